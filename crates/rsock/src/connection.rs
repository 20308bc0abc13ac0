use std::{
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use rsock_stats::{NullRecorder, Recorder};
use rsock_timing::{Duration, Instant, Repeater};
use rsock_wire::{Body, ErrorCode, Flags, Frame, FrameError, Framer, MAX_STREAM_ID, VERSION};
use tracing::{debug, warn};

use crate::{
    ConnectionError, StreamError, StreamErrorKind,
    options::ConnectionOptions,
    payload::Payload,
    socket::RSocket,
    stream::{Stream, StreamOutcome},
    transport::{Transport, TransportStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Client: SETUP written but a required first LEASE has not arrived.
    /// Server: no SETUP received yet.
    SettingUp,
    Ready,
    Closed,
}

/// Notifications surfaced while driving a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection finished its handshake and accepts requests.
    Ready,
    /// Server side: the authoritative SETUP arrived.
    Setup {
        keepalive: Duration,
        max_lifetime: Duration,
        metadata_encoding: String,
        data_encoding: String,
        lease: bool,
        strict: bool,
        payload: Payload,
    },
    /// Client side: the server granted a request budget.
    Lease { budget: u32, ttl: Duration },
    /// A keepalive frame arrived (either direction).
    Keepalive,
    /// Server side: a complete inbound request. Answer via
    /// [`Connection::respond`] or [`Connection::respond_error`].
    Request { stream_id: u32, payload: Payload },
    /// The connection failed; every pending stream has been settled.
    Error(ConnectionError),
    /// Terminal. Emitted exactly once.
    Close,
}

#[derive(Debug, Clone, Copy)]
struct LeaseState {
    remaining: u32,
    expiry: Instant,
}

/// One RSocket link over a byte transport.
///
/// Poll-driven: the owner calls [`Connection::poll_with`] from its loop;
/// transport IO, frame dispatch, keepalives, and request timeouts all settle
/// there. Streams are arena-indexed by id; a stream handle never owns the
/// connection.
pub struct Connection {
    role: Role,
    transport: Box<dyn Transport>,
    framer: Framer,
    phase: Phase,
    streams: HashMap<u32, Stream>,
    latest_stream_id: i64,
    options: ConnectionOptions,
    lease: Option<LeaseState>,
    keepalive: Repeater,
    events: VecDeque<ConnectionEvent>,
    error: Option<ConnectionError>,
    closed: bool,
    recorder: Rc<dyn Recorder>,
}

impl Connection {
    /// Client link: immediately emits SETUP. Not ready until the frame is
    /// written and, when a lease was requested, the first LEASE arrives.
    pub fn client(
        transport: impl Transport + 'static,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let mut conn = Self::new(Role::Client, Box::new(transport), options);
        conn.send_setup()?;
        if conn.options.lease {
            debug!("setup written, awaiting first lease");
        } else {
            conn.phase = Phase::Ready;
            conn.events.push_back(ConnectionEvent::Ready);
        }
        Ok(conn)
    }

    /// Server link: waits for the peer's SETUP and treats it as
    /// authoritative.
    pub fn server(transport: impl Transport + 'static, options: ConnectionOptions) -> Self {
        Self::new(Role::Server, Box::new(transport), options)
    }

    fn new(role: Role, transport: Box<dyn Transport>, options: ConnectionOptions) -> Self {
        let keepalive = Repeater::every(options.keepalive);
        Self {
            role,
            transport,
            framer: Framer::new(),
            phase: Phase::SettingUp,
            streams: HashMap::new(),
            latest_stream_id: match role {
                Role::Client => 0,
                Role::Server => -1,
            },
            options,
            lease: None,
            keepalive,
            events: VecDeque::new(),
            error: None,
            closed: false,
            recorder: Rc::new(NullRecorder),
        }
    }

    pub fn with_recorder(mut self, recorder: Rc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Streams currently tracked, the setup stream excluded.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    /// Drive IO and timers, then hand every pending event to `handler`.
    /// The handler gets the connection back so it can respond inline.
    pub fn poll_with<F>(&mut self, mut handler: F)
    where
        F: FnMut(&mut Self, ConnectionEvent),
    {
        self.drive();
        while let Some(ev) = self.events.pop_front() {
            handler(&mut *self, ev);
        }
    }

    /// Issue a request/response exchange.
    ///
    /// Always returns a stream; allocation or send failures arrive as a
    /// pre-terminated stream. The exchange times out after the configured
    /// request timeout.
    pub fn request(&mut self, req: Payload) -> Stream {
        if self.closed {
            return Stream::failed(StreamError::new(
                StreamErrorKind::Connection,
                "connection closed",
            ));
        }
        let id = match self.next_stream_id() {
            Ok(id) => id,
            Err(err) => {
                let stream_err = StreamError::from(&err);
                self.fail(err);
                return Stream::failed(stream_err);
            }
        };
        if self.options.lease {
            if let Some(lease) = &mut self.lease {
                lease.remaining = lease.remaining.saturating_sub(1);
            }
        }

        let deadline = Instant::now() + self.options.request_timeout;
        let stream = Stream::open(id, Some(deadline));
        self.streams.insert(id, stream.clone());
        self.recorder.incr("requests", 1);

        let frame = Frame::new(id, Body::RequestResponse)
            .with_metadata(req.metadata)
            .with_data(req.data);
        if let Err(err) = self.send_frame(&frame) {
            let stream_err = StreamError::from(&err);
            self.fail(err);
            // no-op when fail() already settled it through the table
            stream.settle(StreamOutcome::Error(stream_err));
        }
        stream
    }

    /// Answer an inbound request (server side).
    pub fn respond(&mut self, stream_id: u32, payload: Payload) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if self.streams.remove(&stream_id).is_none() {
            return Err(ConnectionError::Protocol("responding to an unknown stream"));
        }
        let frame = Frame::new(stream_id, Body::Response)
            .with_metadata(payload.metadata)
            .with_data(payload.data);
        self.send_frame(&frame)
    }

    /// Reject an inbound request with a wire error code.
    pub fn respond_error(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if self.streams.remove(&stream_id).is_none() {
            return Err(ConnectionError::Protocol("rejecting an unknown stream"));
        }
        let frame = Frame::new(stream_id, Body::Error { code })
            .with_data(Some(message.as_bytes().to_vec()));
        self.send_frame(&frame)
    }

    /// Write a raw frame. Escape hatch for extensions and tests; regular
    /// traffic goes through [`Connection::request`] and the responders.
    pub fn send(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        self.send_frame(frame)
    }

    /// Grant the peer a request budget (server side).
    pub fn send_lease(&mut self, budget: u32, ttl: Duration) -> Result<(), ConnectionError> {
        if self.role != Role::Server {
            return Err(ConnectionError::Protocol("lease is server-initiated"));
        }
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let frame = Frame::new(
            0,
            Body::Lease { ttl_ms: ttl.as_millis() as u32, budget },
        );
        self.send_frame(&frame)
    }

    /// `1.0` when the link is live and any granted lease still has budget.
    pub fn availability(&self) -> f64 {
        if self.closed || self.phase != Phase::Ready {
            return 0.0;
        }
        if self.options.lease {
            return match &self.lease {
                Some(lease) if lease.remaining > 0 && Instant::now() < lease.expiry => 1.0,
                _ => 0.0,
            };
        }
        1.0
    }

    /// Close the link. Pending streams are settled with a connection error.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!(role = ?self.role, "closing connection");
        self.settle_all_streams(&StreamError::new(
            StreamErrorKind::Connection,
            "connection closed",
        ));
        self.transport.end();
        self.closed = true;
        self.phase = Phase::Closed;
        self.events.push_back(ConnectionEvent::Close);
    }

    fn send_setup(&mut self) -> Result<(), ConnectionError> {
        let mut flags = Flags::empty();
        flags.set(Flags::LEASE, self.options.lease);
        flags.set(Flags::STRICT, self.options.strict);
        let payload = self.options.setup_payload.clone();
        let frame = Frame::new(
            0,
            Body::Setup {
                version: VERSION,
                keepalive_ms: self.options.keepalive.as_millis() as u32,
                max_lifetime_ms: self.options.max_lifetime.as_millis() as u32,
                metadata_encoding: self.options.metadata_encoding.clone(),
                data_encoding: self.options.data_encoding.clone(),
            },
        )
        .with_flags(flags)
        .with_metadata(payload.metadata)
        .with_data(payload.data);
        self.send_frame(&frame)
    }

    fn next_stream_id(&mut self) -> Result<u32, ConnectionError> {
        let next = self.latest_stream_id + 2;
        if next > i64::from(MAX_STREAM_ID) {
            return Err(ConnectionError::StreamIdsExhausted);
        }
        self.latest_stream_id = next;
        Ok(next as u32)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.encode()?;
        self.transport.write(&bytes)?;
        self.recorder.incr("frames_tx", 1);
        Ok(())
    }

    fn drive(&mut self) {
        if self.closed {
            return;
        }

        // pump the transport through the framer; partial borrows keep the
        // dispatch path out of the callback
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let mut frame_err: Option<FrameError> = None;
        let status = {
            let Self { transport, framer, .. } = self;
            let bypass = transport.framed();
            transport.recv(&mut |chunk| {
                if frame_err.is_some() {
                    return;
                }
                if bypass {
                    frames.push(chunk.to_vec());
                } else if let Err(e) = framer.push(chunk, &mut |f| frames.push(f.to_vec())) {
                    frame_err = Some(e);
                }
            })
        };

        if let Some(err) = frame_err {
            self.fail(err.into());
            return;
        }
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                self.fail(err.into());
                return;
            }
        };

        for bytes in frames {
            if self.closed {
                break;
            }
            self.recorder.incr("frames_rx", 1);
            match Frame::decode(&bytes) {
                Ok(frame) => self.dispatch(frame),
                Err(FrameError::UnsupportedType { frame_type, stream_id }) if stream_id != 0 => {
                    warn!(?frame_type, stream_id, "rejecting unsupported frame type");
                    let _ = self.respond_unsupported(stream_id);
                }
                Err(err) => {
                    self.fail(err.into());
                    return;
                }
            }
        }

        if self.closed {
            return;
        }

        if status == TransportStatus::Closed {
            self.fail(ConnectionError::TransportClosed);
            return;
        }

        if self.role == Role::Client && self.phase == Phase::Ready && self.keepalive.fired() {
            let frame =
                Frame::new(0, Body::Keepalive).with_flags(Flags::KEEPALIVE_RESPONSE);
            if let Err(err) = self.send_frame(&frame) {
                self.fail(err);
                return;
            }
        }

        self.expire_and_cancel();
    }

    fn respond_unsupported(&mut self, stream_id: u32) -> Result<(), ConnectionError> {
        let frame = Frame::new(stream_id, Body::Error { code: ErrorCode::Invalid })
            .with_data(Some(b"unsupported interaction".to_vec()));
        self.send_frame(&frame)
    }

    fn expire_and_cancel(&mut self) {
        let now = Instant::now();
        let mut expired: Vec<u32> = Vec::new();
        let mut cancelled: Vec<u32> = Vec::new();
        for (id, stream) in &self.streams {
            if stream.is_terminated() {
                continue;
            }
            if stream.deadline().is_some_and(|d| now >= d) {
                expired.push(*id);
            } else if stream.cancel_requested() {
                cancelled.push(*id);
            }
        }
        for id in expired {
            debug!(stream_id = id, "request timed out");
            self.recorder.incr("timeouts", 1);
            let _ = self.send_frame(&Frame::new(id, Body::Cancel));
            if let Some(stream) = self.streams.remove(&id) {
                stream.settle(StreamOutcome::Timeout);
            }
        }
        for id in cancelled {
            debug!(stream_id = id, "request cancelled by caller");
            let _ = self.send_frame(&Frame::new(id, Body::Cancel));
            if let Some(stream) = self.streams.remove(&id) {
                stream.settle(StreamOutcome::Error(StreamError::new(
                    StreamErrorKind::Canceled,
                    "cancelled locally",
                )));
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        let stream_id = frame.stream_id;
        let flags = frame.flags;
        let payload = Payload::new(frame.metadata, frame.data);
        match frame.body {
            Body::Setup { keepalive_ms, max_lifetime_ms, metadata_encoding, data_encoding, .. } => {
                self.on_setup(
                    keepalive_ms,
                    max_lifetime_ms,
                    metadata_encoding,
                    data_encoding,
                    flags,
                    payload,
                );
            }
            Body::Lease { ttl_ms, budget } => self.on_lease(ttl_ms, budget),
            Body::Keepalive => {
                if flags.contains(Flags::KEEPALIVE_RESPONSE) {
                    let reply = Frame::new(0, Body::Keepalive);
                    if let Err(err) = self.send_frame(&reply) {
                        self.fail(err);
                        return;
                    }
                }
                self.events.push_back(ConnectionEvent::Keepalive);
            }
            Body::RequestResponse => self.on_request(stream_id, flags, payload),
            Body::Response => self.on_response(stream_id, flags, payload),
            Body::Cancel => {
                if let Some(stream) = self.streams.remove(&stream_id) {
                    debug!(stream_id, "peer cancelled stream");
                    stream.settle(StreamOutcome::Error(StreamError::new(
                        StreamErrorKind::Canceled,
                        "cancelled by peer",
                    )));
                } else {
                    debug!(stream_id, "cancel for unknown stream, discarding");
                }
            }
            Body::Error { code } => self.on_error(stream_id, code, &payload),
        }
    }

    fn on_setup(
        &mut self,
        keepalive_ms: u32,
        max_lifetime_ms: u32,
        metadata_encoding: String,
        data_encoding: String,
        flags: Flags,
        payload: Payload,
    ) {
        if self.role != Role::Server {
            self.fail(ConnectionError::Protocol("client received a SETUP frame"));
            return;
        }
        if self.phase == Phase::Ready {
            warn!("duplicate SETUP, refusing");
            let frame = Frame::new(0, Body::Error { code: ErrorCode::RejectedSetup })
                .with_data(Some(b"setup already received".to_vec()));
            if let Err(err) = self.send_frame(&frame) {
                self.fail(err);
            }
            return;
        }
        // the first SETUP is authoritative: encodings bind here
        self.options.metadata_encoding = metadata_encoding.clone();
        self.options.data_encoding = data_encoding.clone();
        self.phase = Phase::Ready;
        self.events.push_back(ConnectionEvent::Setup {
            keepalive: Duration::from_millis(u64::from(keepalive_ms)),
            max_lifetime: Duration::from_millis(u64::from(max_lifetime_ms)),
            metadata_encoding,
            data_encoding,
            lease: flags.contains(Flags::LEASE),
            strict: flags.contains(Flags::STRICT),
            payload,
        });
        self.events.push_back(ConnectionEvent::Ready);
    }

    fn on_lease(&mut self, ttl_ms: u32, budget: u32) {
        if self.role != Role::Client {
            warn!("server received a LEASE frame, discarding");
            return;
        }
        let ttl = Duration::from_millis(u64::from(ttl_ms));
        self.lease = Some(LeaseState { remaining: budget, expiry: Instant::now() + ttl });
        self.events.push_back(ConnectionEvent::Lease { budget, ttl });
        if self.options.lease && self.phase == Phase::SettingUp {
            self.phase = Phase::Ready;
            self.events.push_back(ConnectionEvent::Ready);
        }
    }

    fn on_request(&mut self, stream_id: u32, flags: Flags, payload: Payload) {
        if self.role != Role::Server {
            warn!(stream_id, "client received a request, rejecting");
            let frame = Frame::new(stream_id, Body::Error { code: ErrorCode::Invalid })
                .with_data(Some(b"requests are not accepted here".to_vec()));
            if let Err(err) = self.send_frame(&frame) {
                self.fail(err);
            }
            return;
        }
        let stream =
            self.streams.entry(stream_id).or_insert_with(|| Stream::open(stream_id, None));
        if flags.contains(Flags::FOLLOWS) {
            stream.absorb_fragment(payload);
            return;
        }
        let full = stream.assemble(payload);
        self.events.push_back(ConnectionEvent::Request { stream_id, payload: full });
    }

    fn on_response(&mut self, stream_id: u32, flags: Flags, payload: Payload) {
        if flags.contains(Flags::FOLLOWS) {
            match self.streams.get(&stream_id) {
                Some(stream) => stream.absorb_fragment(payload),
                None => debug!(stream_id, "response fragment for unknown stream, discarding"),
            }
            return;
        }
        let Some(stream) = self.streams.remove(&stream_id) else {
            debug!(stream_id, "response for unknown stream, discarding");
            return;
        };
        let full = stream.assemble(payload);
        self.recorder.incr("responses", 1);
        self.recorder.timing("request_latency", stream.started().elapsed());
        stream.settle(StreamOutcome::Response(full));
    }

    fn on_error(&mut self, stream_id: u32, code: ErrorCode, payload: &Payload) {
        if stream_id == 0 {
            let message = payload
                .data
                .as_deref()
                .map(|d| String::from_utf8_lossy(d).into_owned())
                .unwrap_or_default();
            let err = if code.is_setup_error() {
                ConnectionError::Setup { code, message }
            } else {
                ConnectionError::Peer(message)
            };
            self.fail(err);
            return;
        }
        if let Some(stream) = self.streams.remove(&stream_id) {
            self.recorder.incr("stream_errors", 1);
            stream.settle(StreamOutcome::Error(StreamError::from_wire(
                code,
                payload.data.as_deref(),
            )));
        } else {
            debug!(stream_id, ?code, "error for unknown stream, discarding");
        }
    }

    fn settle_all_streams(&mut self, err: &StreamError) {
        for (_, stream) in self.streams.drain() {
            stream.settle(StreamOutcome::Error(err.clone()));
        }
    }

    fn fail(&mut self, err: ConnectionError) {
        if self.closed {
            return;
        }
        warn!(%err, role = ?self.role, "connection failed");
        self.settle_all_streams(&StreamError::from(&err));
        self.transport.end();
        self.closed = true;
        self.phase = Phase::Closed;
        self.events.push_back(ConnectionEvent::Error(err.clone()));
        self.events.push_back(ConnectionEvent::Close);
        self.error = Some(err);
    }
}

impl RSocket for Connection {
    fn request(&mut self, req: Payload) -> Stream {
        Connection::request(self, req)
    }

    fn availability(&self) -> f64 {
        Connection::availability(self)
    }

    fn poll(&mut self) {
        self.poll_with(|_, _| {});
    }

    fn close(&mut self) {
        Connection::close(self);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
