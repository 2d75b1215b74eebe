use crate::err::*;
use crate::message::{Disposition, Message, StatusCode};
use crate::params::Protocol;
use std::future::Future;

pub mod memory;

/// Invoked once by the transport when the hub acknowledges a sent message.
pub type EventCallback = Box<dyn FnOnce(StatusCode) + Send>;

/// Invoked by the transport for every message the hub delivers to the device.
pub type MessageCallback = Box<dyn FnMut(Message) -> Disposition + Send>;

/// A device-to-cloud client library, reduced to what the probe needs from it.
pub trait DeviceTransport: 'static + Send + Sync {
    type Session: DeviceSession;

    /// Open a session for the device named in `connection_string`.
    fn open(
        &self,
        connection_string: &str,
        protocol: Protocol,
    ) -> impl Future<Output = ProbeResult<Self::Session>> + Send;
}

/// An open device session. Callbacks are invoked from contexts owned by the transport.
pub trait DeviceSession: 'static + Send + Sync {
    fn close(&self) -> ProbeResult<()>;

    /// Queue `message` for delivery. Returns once queued; `on_complete` runs later.
    fn send_event_async(&self, message: Message, on_complete: EventCallback) -> ProbeResult<()>;

    /// Register the callback for inbound messages. It stays registered until the session closes.
    fn set_message_callback(&self, on_message: MessageCallback) -> ProbeResult<()>;
}
