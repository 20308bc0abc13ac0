use std::{cell::RefCell, rc::Rc};

use rsock_timing::Instant;

use crate::{StreamError, payload::Payload};

/// Terminal outcome of a request stream. Exactly one is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Response(Payload),
    Error(StreamError),
    Timeout,
}

#[derive(Debug)]
pub(crate) struct StreamCell {
    pub(crate) id: u32,
    pub(crate) started: Instant,
    pub(crate) deadline: Option<Instant>,
    pub(crate) outcome: Option<StreamOutcome>,
    pub(crate) cancel_requested: bool,
    /// Accumulates fragments while FOLLOWS frames arrive.
    pub(crate) partial: Option<Payload>,
}

impl StreamCell {
    fn new(id: u32, deadline: Option<Instant>) -> Self {
        Self {
            id,
            started: Instant::now(),
            deadline,
            outcome: None,
            cancel_requested: false,
            partial: None,
        }
    }
}

/// Caller-side handle to a single request/response exchange.
///
/// The handle is shared with whatever owns the exchange (a connection or a
/// decorator); it never owns the connection itself. Poll for the terminal
/// outcome; request cancellation with [`Stream::cancel`], which the owner
/// acts on the next time it is driven.
#[derive(Debug, Clone)]
pub struct Stream {
    cell: Rc<RefCell<StreamCell>>,
}

impl Stream {
    pub(crate) fn open(id: u32, deadline: Option<Instant>) -> Self {
        Self { cell: Rc::new(RefCell::new(StreamCell::new(id, deadline))) }
    }

    /// Stream with no owner yet; used by decorators that proxy an inner
    /// exchange.
    pub fn detached() -> Self {
        Self::open(0, None)
    }

    /// Stream that is already terminated with `err`.
    pub fn failed(err: StreamError) -> Self {
        let stream = Self::detached();
        stream.settle(StreamOutcome::Error(err));
        stream
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.cell.borrow().id
    }

    /// The instant the exchange started.
    pub fn started(&self) -> Instant {
        self.cell.borrow().started
    }

    /// Terminal outcome, if the stream has terminated.
    pub fn poll(&self) -> Option<StreamOutcome> {
        self.cell.borrow().outcome.clone()
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.cell.borrow().outcome.is_some()
    }

    /// Ask the owner to cancel this exchange. No-op after termination.
    pub fn cancel(&self) {
        self.cell.borrow_mut().cancel_requested = true;
    }

    #[inline]
    pub fn cancel_requested(&self) -> bool {
        self.cell.borrow().cancel_requested
    }

    /// Deliver the terminal outcome. The first settle wins; returns whether
    /// this call took effect.
    pub fn settle(&self, outcome: StreamOutcome) -> bool {
        let mut cell = self.cell.borrow_mut();
        if cell.outcome.is_some() {
            return false;
        }
        cell.outcome = Some(outcome);
        true
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.cell.borrow().deadline
    }

    pub(crate) fn absorb_fragment(&self, fragment: Payload) {
        let mut cell = self.cell.borrow_mut();
        match &mut cell.partial {
            Some(acc) => acc.extend(fragment),
            slot @ None => *slot = Some(fragment),
        }
    }

    /// Merge any buffered fragments with the final one.
    pub(crate) fn assemble(&self, last: Payload) -> Payload {
        let mut cell = self.cell.borrow_mut();
        match cell.partial.take() {
            Some(mut acc) => {
                acc.extend(last);
                acc
            }
            None => last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamErrorKind;

    #[test]
    fn first_settle_wins() {
        let s = Stream::detached();
        assert!(s.settle(StreamOutcome::Response(Payload::from_data(b"a".to_vec()))));
        assert!(!s.settle(StreamOutcome::Timeout));
        assert!(matches!(s.poll(), Some(StreamOutcome::Response(_))));
    }

    #[test]
    fn failed_stream_is_born_terminated() {
        let s = Stream::failed(StreamError::new(StreamErrorKind::EmptyBalancer, "no sockets"));
        match s.poll() {
            Some(StreamOutcome::Error(e)) => assert_eq!(e.kind, StreamErrorKind::EmptyBalancer),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cancel_flag_sticks() {
        let s = Stream::detached();
        assert!(!s.cancel_requested());
        s.cancel();
        assert!(s.cancel_requested());
    }
}
