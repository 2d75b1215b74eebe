use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::err::*;
use crate::params::ConnectionParameters;
use crate::transport::{DeviceSession, DeviceTransport};

/// One open device session plus whether it has been closed. Clones share the session and the flag.
pub struct ConnectionHandle<S: DeviceSession> {
    inner: Arc<HandleInner<S>>,
}

struct HandleInner<S> {
    session: S,
    closed: AtomicBool,
}

impl<S: DeviceSession> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: DeviceSession> ConnectionHandle<S> {
    /// Open a session for `params`. A failed open never yields a handle.
    pub async fn open<T>(transport: &T, params: &ConnectionParameters) -> ProbeResult<Self>
    where
        T: DeviceTransport<Session = S>,
    {
        let session = transport
            .open(&params.connection_string(), params.protocol)
            .await
            .map_err(|e| match e {
                ProbeError::OpenFailed(_) => e,
                other => ProbeError::OpenFailed(other.to_string()),
            })?;

        Ok(Self {
            inner: Arc::new(HandleInner {
                session,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn session(&self) -> &S {
        &self.inner.session
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the session. Only the first call tears anything down; failures are logged and dropped.
    /// Returns whether this call performed the teardown.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.inner.session.close() {
            IgnorableError::from(e).log("Failed to close a client:");
        }
        true
    }
}

/// A single-assignment cell holding the handle an operation opened, once it has opened one.
/// Whoever closes through the slot sees whatever occupies it at that moment.
pub struct HandleSlot<S: DeviceSession> {
    cell: Arc<OnceCell<ConnectionHandle<S>>>,
}

impl<S: DeviceSession> Clone for HandleSlot<S> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<S: DeviceSession> Default for HandleSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DeviceSession> HandleSlot<S> {
    pub fn new() -> Self {
        Self { cell: Arc::new(OnceCell::new()) }
    }

    /// Fill the slot. Errors if it already holds a handle.
    pub fn fill(&self, handle: ConnectionHandle<S>) -> ProbeResult<()> {
        self.cell
            .set(handle)
            .map_err(|_| ProbeError::InternalError("Handle slot already filled".into()))
    }

    pub fn get(&self) -> Option<ConnectionHandle<S>> {
        self.cell.get().cloned()
    }

    /// Close whatever handle the slot holds. An empty slot or a closed handle is a no-op.
    pub fn close(&self) -> bool {
        match self.cell.get() {
            Some(handle) => handle.close(),
            None => {
                debug!("No client to close");
                false
            }
        }
    }
}
