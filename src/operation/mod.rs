mod receive;
mod send;

pub use self::receive::receive_messages;
pub use self::send::send_one_message;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ProbeConfig;
use crate::err::*;
use crate::guard::{TimeoutGuard, DEFAULT_CLIENT_TIMEOUT};
use crate::handle::{ConnectionHandle, HandleSlot};
use crate::params::ConnectionParameters;
use crate::reporter::{Channel, ResultReporter};
use crate::stopper::Stopper;
use crate::transport::{DeviceSession, DeviceTransport};

/// Where an operation is in its life.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperationState {
    Idle,
    Opening,
    OpenFailed,
    OpenOk,
    AwaitingCallback,
    CallbackReceived,
    Closed,
}

impl OperationState {
    /// No further transition can happen from here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::OpenFailed | OperationState::Closed)
    }
}

/// What a send or receive operation shares with the tasks it starts: the slot its handle goes
/// into, the reporter its outcomes go to and its published state.
pub struct OperationContext<S: DeviceSession> {
    slot: HandleSlot<S>,
    reporter: Arc<dyn ResultReporter>,
    state: Arc<watch::Sender<OperationState>>,
    dispatchers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: DeviceSession> Clone for OperationContext<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            reporter: self.reporter.clone(),
            state: self.state.clone(),
            dispatchers: self.dispatchers.clone(),
        }
    }
}

impl<S: DeviceSession> OperationContext<S> {
    pub fn new(reporter: Arc<dyn ResultReporter>) -> (Self, watch::Receiver<OperationState>) {
        let (state, state_receiver) = watch::channel(OperationState::Idle);
        let context = Self {
            slot: HandleSlot::new(),
            reporter,
            state: Arc::new(state),
            dispatchers: Arc::new(Mutex::new(vec![])),
        };
        (context, state_receiver)
    }

    pub fn slot(&self) -> &HandleSlot<S> {
        &self.slot
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub(crate) fn report(&self, channel: Channel, text: &str) {
        self.reporter.report(channel, text);
    }

    /// Move to `next` unless the operation is already closed.
    pub(crate) fn set_state(&self, next: OperationState) {
        self.state.send_if_modified(|current| {
            if *current == OperationState::Closed || *current == next {
                return false;
            }
            debug!("Operation {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    pub(crate) fn track(&self, dispatcher: JoinHandle<()>) {
        self.dispatchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(dispatcher);
    }

    fn take_dispatchers(&self) -> Vec<JoinHandle<()>> {
        self.dispatchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    /// Close the slot's handle, marking the operation closed if this call did the teardown.
    pub(crate) fn close(&self) -> bool {
        let closed = self.slot.close();
        if closed {
            self.state.send_replace(OperationState::Closed);
        }
        closed
    }
}

/// Open a handle and put it in the slot. On failure the error text is reported on `channel`
/// and nothing is returned.
async fn open_handle<T>(
    transport: &T,
    params: &ConnectionParameters,
    channel: Channel,
    context: &OperationContext<T::Session>,
) -> Option<ConnectionHandle<T::Session>>
where
    T: DeviceTransport,
{
    context.set_state(OperationState::Opening);

    let handle = match ConnectionHandle::open(transport, params).await {
        Ok(handle) => handle,
        Err(e) => {
            context.set_state(OperationState::OpenFailed);
            context.report(channel, &e.to_string());
            return None;
        }
    };

    if let Err(e) = context.slot.fill(handle.clone()) {
        handle.close();
        context.set_state(OperationState::OpenFailed);
        context.report(channel, &e.to_string());
        return None;
    }

    context.set_state(OperationState::OpenOk);
    Some(handle)
}

/// Runs send and receive operations against one transport, reporting to one reporter.
pub struct Probe<T: DeviceTransport> {
    transport: Arc<T>,
    reporter: Arc<dyn ResultReporter>,
    timeout: Duration,
}

impl<T: DeviceTransport> Probe<T> {
    pub fn new(transport: T, reporter: impl ResultReporter) -> Self {
        Self {
            transport: Arc::new(transport),
            reporter: Arc::new(reporter),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn with_config(transport: T, reporter: impl ResultReporter, config: &ProbeConfig) -> Self {
        Self::new(transport, reporter).with_timeout(config.timeout())
    }

    /// How long a client may stay open before it is forcibly closed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `payload` once. Returns straight away; the work happens in the background.
    pub fn send(&self, params: ConnectionParameters, payload: &str) -> OperationTask<T::Session> {
        let payload = payload.to_string();
        self.start(move |transport, context| async move {
            send_one_message(&*transport, &params, &payload, &context).await;
        })
    }

    /// Listen for messages until the client is closed. Returns straight away.
    pub fn receive(&self, params: ConnectionParameters) -> OperationTask<T::Session> {
        self.start(move |transport, context| async move {
            receive_messages(&*transport, &params, &context).await;
        })
    }

    fn start<F, Fut>(&self, work: F) -> OperationTask<T::Session>
    where
        F: FnOnce(Arc<T>, OperationContext<T::Session>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (context, state) = OperationContext::new(self.reporter.clone());

        // armed before the worker starts, so it may fire while the slot is still empty
        let expiry_context = context.clone();
        let guard = TimeoutGuard::arm_with(context.slot.clone(), self.timeout, move |closed| {
            if closed {
                expiry_context.state.send_replace(OperationState::Closed);
            }
        });

        let worker = tokio::spawn(work(self.transport.clone(), context.clone()));

        OperationTask { context, guard, worker, state }
    }
}

/// A running send or receive operation. Cancel it with `Stopper::stop`, or wait for the
/// timeout to close it with `Stopper::join`.
pub struct OperationTask<S: DeviceSession> {
    context: OperationContext<S>,
    guard: TimeoutGuard,
    worker: JoinHandle<()>,
    state: watch::Receiver<OperationState>,
}

impl<S: DeviceSession> OperationTask<S> {
    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Wait until the state satisfies `wanted`, returning that state.
    pub async fn wait_for_state(
        &mut self,
        wanted: impl Fn(OperationState) -> bool,
    ) -> ProbeResult<OperationState> {
        let state = self
            .state
            .wait_for(|s| wanted(*s))
            .await
            .map_err(|_| ProbeError::ChannelClosed)?;
        Ok(*state)
    }

    /// The handle the operation opened, once it has opened one.
    pub fn handle(&self) -> Option<ConnectionHandle<S>> {
        self.context.slot.get()
    }
}

impl<S: DeviceSession> Stopper for OperationTask<S> {
    async fn stop(self) -> ProbeResult<()> {
        self.guard.stop().await?;
        self.worker.abort();
        join_ignoring_cancel(self.worker).await?;
        // closing releases every callback, so the dispatchers drain what was delivered and end
        self.context.close();
        for dispatcher in self.context.take_dispatchers() {
            dispatcher.await?;
        }
        Ok(())
    }

    /// Returns once the guard has fired and the transport has let go of the operation's
    /// callbacks. If the guard fired before the open completed the handle is never closed
    /// by it, and a receive will not finish on its own; `stop` still closes it.
    async fn join(self) -> ProbeResult<()> {
        self.worker.await?;
        self.guard.join().await?;
        for dispatcher in self.context.take_dispatchers() {
            dispatcher.await?;
        }
        Ok(())
    }
}

async fn join_ignoring_cancel(handle: JoinHandle<()>) -> ProbeResult<()> {
    match handle.await {
        Err(e) if e.is_cancelled() => Ok(()),
        result => Ok(result?),
    }
}
