use std::collections::VecDeque;

use rsock::{Payload, RSocket, Stream, StreamOutcome};

/// Scripted socket for decorator tests: every request opens a detached
/// stream, and each poll settles pending streams with the next scripted
/// outcome, oldest first.
pub(crate) struct FakeSocket {
    pub pending: Vec<Stream>,
    pub script: VecDeque<StreamOutcome>,
    pub availability: f64,
    pub requests: usize,
    pub closed: bool,
}

impl FakeSocket {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            script: VecDeque::new(),
            availability: 1.0,
            requests: 0,
            closed: false,
        }
    }

    pub fn push_outcome(&mut self, outcome: StreamOutcome) {
        self.script.push_back(outcome);
    }
}

impl RSocket for FakeSocket {
    fn request(&mut self, _req: Payload) -> Stream {
        self.requests += 1;
        let stream = Stream::detached();
        self.pending.push(stream.clone());
        stream
    }

    fn availability(&self) -> f64 {
        if self.closed { 0.0 } else { self.availability }
    }

    fn poll(&mut self) {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].is_terminated() {
                self.pending.remove(i);
                continue;
            }
            let Some(outcome) = self.script.pop_front() else { break };
            self.pending.remove(i).settle(outcome);
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
