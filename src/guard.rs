use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::err::*;
use crate::handle::HandleSlot;
use crate::stopper::Stopper;
use crate::transport::DeviceSession;

pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CLIENT_TIMEOUT_MS);

/// How a guard ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GuardOutcome {
    /// The timer ran out. `closed` is true if this guard performed the close.
    Expired { closed: bool },
    /// The guard was stopped before the timer ran out.
    Disarmed,
}

/// A single-shot watchdog that force-closes whatever handle occupies a slot once its timer runs out.
///
/// The slot is read when the timer fires, not when the guard is armed, so a guard can be armed
/// before the handle it protects exists. If the slot is still empty at expiry nothing happens.
/// Dropping the guard does not disarm it; use `Stopper::stop` for that.
pub struct TimeoutGuard {
    stop_sender: oneshot::Sender<()>,
    join_handle: JoinHandle<ProbeResult<GuardOutcome>>,
}

impl TimeoutGuard {
    pub fn arm<S: DeviceSession>(slot: HandleSlot<S>, duration: Duration) -> Self {
        Self::arm_with(slot, duration, |_| {})
    }

    /// Like `arm`, additionally calling `on_expiry` with whether the guard closed the handle.
    pub fn arm_with<S, F>(slot: HandleSlot<S>, duration: Duration, on_expiry: F) -> Self
    where
        S: DeviceSession,
        F: FnOnce(bool) + Send + 'static,
    {
        let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            tokio::select! {
                Ok(()) = &mut stop_receiver => {
                    debug!("Timeout guard disarmed");
                    Ok(GuardOutcome::Disarmed)
                },
                _ = tokio::time::sleep(duration) => {
                    info!("Attempting to close a client.");
                    let closed = slot.close();
                    on_expiry(closed);
                    Ok(GuardOutcome::Expired { closed })
                }
            }
        });

        Self { stop_sender, join_handle }
    }

    /// Wait for the guard to end and say how it ended.
    pub async fn outcome(self) -> ProbeResult<GuardOutcome> {
        self.join_handle.await?
    }
}

impl Stopper for TimeoutGuard {
    async fn stop(self) -> ProbeResult<()> {
        // already fired if nobody is listening
        let _ = self.stop_sender.send(());
        self.join_handle.await??;
        Ok(())
    }

    async fn join(self) -> ProbeResult<()> {
        self.join_handle.await??;
        Ok(())
    }
}
