use futures::Future;
use crate::err::ProbeResult;

/// A handle on something running in the background: a watchdog or a whole operation.
/// Either cancel it or wait for it to finish on its own.
pub trait Stopper{
    /// Cancel the process and then wait for it to terminate
    fn stop(self) -> impl Future<Output=ProbeResult<()>> + Send;
    /// Wait for the process to terminate without cancelling it
    fn join(self) -> impl Future<Output=ProbeResult<()>> + Send;
}
