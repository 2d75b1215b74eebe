//! # IoT Hub Probe
//!
//! A manual test harness for an IoT hub's device endpoint: enter hub credentials, pick a
//! protocol, then send one message or listen for messages.
//!
//! The crate does not implement any IoT protocol itself. A device client library is plugged in
//! through the `DeviceTransport` and `DeviceSession` traits, and the probe takes care of the
//! connection lifecycle around it: opening a client, correlating asynchronous acknowledgements
//! and deliveries with the request that caused them, force-closing the client after a timeout
//! and turning every outcome, good or bad, into a line of text.
//!
//! ## Sending
//!
//! ```ignore
//! let hub = MemoryHub::new("hub1");
//! hub.register_device("dev1", "key1");
//!
//! let (reporter, mut reports) = ChannelReporter::new();
//! let probe = Probe::new(hub, reporter);
//!
//! let params = ConnectionParameters::new("hub1", "dev1", "key1", Protocol::Https);
//! let _task = probe.send(params, "hello");
//!
//! let report = reports.recv().await.unwrap();
//! assert_eq!(report.text, "IoT Hub responded to message 'hello' with status OK");
//! ```
//!
//! ## Receiving
//!
//! ```ignore
//! let task = probe.receive(params);
//! hub.send_to_device("dev1", Message::new("ping"))?;
//!
//! // each delivered message is reported verbatim on the receive channel
//! let report = reports.recv().await.unwrap();
//! assert_eq!(report.text, "ping");
//!
//! // stop listening now rather than waiting for the timeout
//! task.stop().await?;
//! ```
//!
//! ## Timeouts
//!
//! Every operation arms a `TimeoutGuard` (30 seconds unless configured otherwise) before its
//! client is opened. When the guard fires it closes whatever client the operation has opened
//! by then. Closing is idempotent and best effort: closing twice, or closing before anything
//! was opened, does nothing, and a failing close is logged rather than reported.

pub mod callback;
pub mod config;
pub(crate) mod err;
pub mod guard;
pub mod handle;
pub mod message;
pub mod operation;
pub mod params;
pub mod prelude;
pub mod reporter;
pub mod transport;
#[cfg(debug_assertions)]
pub(crate) mod debug;
mod stopper;

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

#[cfg(test)]
pub mod test;

pub use err::*;
pub use callback::CallbackContext;
pub use config::{InputFields, ProbeConfig};
pub use guard::{GuardOutcome, TimeoutGuard, DEFAULT_CLIENT_TIMEOUT};
pub use handle::{ConnectionHandle, HandleSlot};
pub use message::{Disposition, Message, StatusCode};
pub use operation::{receive_messages, send_one_message, OperationContext, OperationState, OperationTask, Probe};
pub use params::{ConnectionParameters, ConnectionString, Protocol};
pub use reporter::{Channel, ChannelReporter, LogReporter, Report, ResultReporter};
pub use stopper::Stopper;
pub use transport::{memory::MemoryHub, DeviceSession, DeviceTransport};
