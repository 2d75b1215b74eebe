pub use crate::err::*;
pub use crate::params::{ConnectionParameters, Protocol};
pub use crate::message::{Message, StatusCode};
pub use crate::operation::{OperationState, OperationTask, Probe};
pub use crate::reporter::{Channel, ChannelReporter, LogReporter, Report, ResultReporter};
pub use crate::config::ProbeConfig;
pub use crate::transport::{memory::MemoryHub, DeviceSession, DeviceTransport};
pub use crate::stopper::Stopper;
