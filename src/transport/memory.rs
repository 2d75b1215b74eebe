use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::err::*;
use crate::message::{Disposition, Message, StatusCode};
use crate::params::{ConnectionString, Protocol};

use super::{DeviceSession, DeviceTransport, EventCallback, MessageCallback};

const DEFAULT_ACK_DELAY_MS: u64 = 10;

/// An in-process stand-in for an IoT hub. Devices are registered with a key, sessions are
/// opened against it with ordinary connection strings, telemetry is acknowledged after a
/// configurable delay and cloud-to-device messages are pushed to whichever session of the
/// device is listening.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

struct HubState {
    host_name: String,
    next_session_id: u32,
    devices: HashMap<String, Device>,
    behaviour: Behaviour,
}

#[derive(Clone)]
struct Behaviour {
    open_delay: Duration,
    ack_delay: Duration,
    ack_status: StatusCode,
    offline: bool,
    fail_sends: bool,
    fail_close: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            open_delay: Duration::ZERO,
            ack_delay: Duration::from_millis(DEFAULT_ACK_DELAY_MS),
            ack_status: StatusCode::Ok,
            offline: false,
            fail_sends: false,
            fail_close: false,
        }
    }
}

#[derive(Default)]
struct Device {
    key: String,
    telemetry: Vec<Message>,
    dispositions: Vec<Disposition>,
    queued: VecDeque<Message>,
    listener: Option<(u32, UnboundedSender<Message>)>,
    opened: usize,
    closed: usize,
}

impl MemoryHub {
    pub fn new(host_name: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                host_name: host_name.to_string(),
                next_session_id: 0,
                devices: HashMap::new(),
                behaviour: Behaviour::default(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn host_name(&self) -> String {
        self.state().host_name.clone()
    }

    /// Register a device identity. Re-registering replaces the key.
    pub fn register_device(&self, device_id: &str, key: &str) {
        let mut state = self.state();
        let device = state.devices.entry(device_id.to_string()).or_default();
        device.key = key.to_string();
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state().behaviour.open_delay = delay;
    }

    pub fn set_ack_delay(&self, delay: Duration) {
        self.state().behaviour.ack_delay = delay;
    }

    pub fn set_ack_status(&self, status: StatusCode) {
        self.state().behaviour.ack_status = status;
    }

    /// While offline every open fails as if the network were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state().behaviour.offline = offline;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state().behaviour.fail_sends = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state().behaviour.fail_close = fail;
    }

    /// Queue a cloud-to-device message. It is delivered immediately if a session of the
    /// device is listening, otherwise when one starts to.
    pub fn send_to_device(&self, device_id: &str, message: Message) -> ProbeResult<()> {
        let mut state = self.state();
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ProbeError::DeviceNotFound(device_id.to_string()))?;

        #[cfg(debug_assertions)]
        debug!("{}", crate::debug::c2d_to_string(device_id, &message));

        let undelivered = match &device.listener {
            Some((_, sender)) => sender.send(message).err().map(|e| e.0),
            None => Some(message),
        };
        if let Some(message) = undelivered {
            device.listener = None;
            device.queued.push_back(message);
        }
        Ok(())
    }

    /// Telemetry the hub has acknowledged from the device, in arrival order.
    pub fn telemetry(&self, device_id: &str) -> Vec<Message> {
        self.state().devices.get(device_id).map(|d| d.telemetry.clone()).unwrap_or_default()
    }

    /// The dispositions the device returned for delivered messages, in delivery order.
    pub fn dispositions(&self, device_id: &str) -> Vec<Disposition> {
        self.state().devices.get(device_id).map(|d| d.dispositions.clone()).unwrap_or_default()
    }

    pub fn sessions_opened(&self, device_id: &str) -> usize {
        self.state().devices.get(device_id).map(|d| d.opened).unwrap_or(0)
    }

    pub fn sessions_closed(&self, device_id: &str) -> usize {
        self.state().devices.get(device_id).map(|d| d.closed).unwrap_or(0)
    }

    fn behaviour(&self) -> Behaviour {
        self.state().behaviour.clone()
    }

    fn authenticate(&self, connection_string: &str) -> ProbeResult<(u32, String)> {
        let parsed = ConnectionString::parse(connection_string)?;
        let mut state = self.state();

        if state.behaviour.offline {
            return Err(ProbeError::OpenFailed(format!(
                "Could not reach {}: network unreachable",
                &parsed.host_name
            )));
        }
        if parsed.host_name != state.host_name {
            return Err(ProbeError::OpenFailed(format!("Unknown host {}", &parsed.host_name)));
        }

        state.next_session_id += 1;
        let session_id = state.next_session_id;

        let device = state
            .devices
            .get_mut(&parsed.device_id)
            .ok_or_else(|| ProbeError::DeviceNotFound(parsed.device_id.clone()))?;
        if device.key != parsed.shared_access_key {
            return Err(ProbeError::Unauthorized(format!(
                "Invalid key for device {}",
                &parsed.device_id
            )));
        }
        device.opened += 1;

        Ok((session_id, parsed.device_id))
    }

    fn accept_telemetry(&self, device_id: &str, message: Message) {
        #[cfg(debug_assertions)]
        debug!("{}", crate::debug::d2c_to_string(device_id, &message));

        if let Some(device) = self.state().devices.get_mut(device_id) {
            device.telemetry.push(message);
        }
    }

    fn record_disposition(&self, device_id: &str, disposition: Disposition) {
        if let Some(device) = self.state().devices.get_mut(device_id) {
            device.dispositions.push(disposition);
        }
    }

    /// Put undelivered messages back at the head of the queue, keeping their order.
    fn requeue(&self, device_id: &str, messages: Vec<Message>) {
        if let Some(device) = self.state().devices.get_mut(device_id) {
            for message in messages.into_iter().rev() {
                device.queued.push_front(message);
            }
        }
    }

    /// Make `session_id` the device's listener, forwarding the messages waiting for it first.
    /// Both happen under the hub lock so no later message can overtake a queued one.
    fn listen(&self, device_id: &str, session_id: u32, sender: UnboundedSender<Message>) {
        if let Some(device) = self.state().devices.get_mut(device_id) {
            while let Some(waiting) = device.queued.pop_front() {
                if let Err(e) = sender.send(waiting) {
                    device.queued.push_front(e.0);
                    return;
                }
            }
            device.listener = Some((session_id, sender));
        }
    }

    fn end_session(&self, device_id: &str, session_id: u32) {
        if let Some(device) = self.state().devices.get_mut(device_id) {
            if matches!(device.listener, Some((id, _)) if id == session_id) {
                device.listener = None;
            }
            device.closed += 1;
        }
    }
}

impl DeviceTransport for MemoryHub {
    type Session = MemorySession;

    async fn open(&self, connection_string: &str, protocol: Protocol) -> ProbeResult<MemorySession> {
        let delay = self.behaviour().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (session_id, device_id) = self.authenticate(connection_string)?;
        debug!("Session #{} opened for {} over {}", session_id, &device_id, protocol);

        Ok(MemorySession {
            hub: self.clone(),
            session_id,
            device_id,
            protocol,
            shared: Arc::new(SessionShared {
                closed: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// A session opened against a `MemoryHub`.
pub struct MemorySession {
    hub: MemoryHub,
    session_id: u32,
    device_id: String,
    protocol: Protocol,
    shared: Arc<SessionShared>,
}

struct SessionShared {
    closed: AtomicBool,
    pending: Mutex<HashMap<String, EventCallback>>,
}

impl SessionShared {
    fn take_pending(&self, message_id: &str) -> Option<EventCallback> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(message_id)
    }

    fn drain_pending(&self) -> Vec<EventCallback> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, callback)| callback)
            .collect()
    }
}

impl MemorySession {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl DeviceSession for MemorySession {
    fn close(&self) -> ProbeResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.hub.end_session(&self.device_id, self.session_id);
        debug!("Session #{} closed", self.session_id);

        // sends still in flight never reach the hub
        for callback in self.shared.drain_pending() {
            callback(StatusCode::MessageCancelledOnClose);
        }

        if self.hub.behaviour().fail_close {
            return Err(ProbeError::CloseFailed(format!(
                "Session #{} did not shut down cleanly",
                self.session_id
            )));
        }
        Ok(())
    }

    fn send_event_async(&self, message: Message, on_complete: EventCallback) -> ProbeResult<()> {
        if self.is_closed() {
            return Err(ProbeError::SessionClosed);
        }
        let behaviour = self.hub.behaviour();
        if behaviour.fail_sends {
            return Err(ProbeError::SendFailed(format!(
                "Hub refused message {}",
                &message.message_id
            )));
        }

        self.shared
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(message.message_id.clone(), on_complete);

        let hub = self.hub.clone();
        let shared = self.shared.clone();
        let device_id = self.device_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(behaviour.ack_delay).await;
            // the callback is gone if the session was closed in the meantime
            if let Some(callback) = shared.take_pending(&message.message_id) {
                #[cfg(debug_assertions)]
                debug!("{}", crate::debug::ack_to_string(&message.message_id, behaviour.ack_status));

                hub.accept_telemetry(&device_id, message);
                callback(behaviour.ack_status);
            }
        });

        Ok(())
    }

    fn set_message_callback(&self, mut on_message: MessageCallback) -> ProbeResult<()> {
        if self.is_closed() {
            return Err(ProbeError::SessionClosed);
        }

        let (sender, mut receiver) = unbounded_channel::<Message>();
        self.hub.listen(&self.device_id, self.session_id, sender);

        let hub = self.hub.clone();
        let shared = self.shared.clone();
        let device_id = self.device_id.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if shared.closed.load(Ordering::SeqCst) {
                    let mut undelivered = vec![message];
                    while let Ok(message) = receiver.try_recv() {
                        undelivered.push(message);
                    }
                    hub.requeue(&device_id, undelivered);
                    break;
                }
                let disposition = on_message(message);
                hub.record_disposition(&device_id, disposition);
            }
        });

        Ok(())
    }
}
