use crate::{payload::Payload, stream::Stream};

/// Request surface shared by connections, decorators, and the balancer.
///
/// `request` always hands back a [`Stream`]; failures (closed socket, empty
/// balancer, exhausted ids) arrive as a pre-terminated stream rather than an
/// `Err`, so callers and decorators treat every exchange uniformly.
///
/// `poll` drives the socket: transport IO, timers, and any decorator
/// bookkeeping settle there. Owners must call it regularly.
pub trait RSocket {
    fn request(&mut self, req: Payload) -> Stream;

    /// Readiness in `[0, 1]`; the balancer weighs selection by it.
    fn availability(&self) -> f64;

    fn poll(&mut self);

    /// Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
