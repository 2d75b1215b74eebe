use crate::callback::{event_callback, CallbackContext};
use crate::handle::ConnectionHandle;
use crate::message::Message;
use crate::params::ConnectionParameters;
use crate::reporter::Channel;
use crate::transport::{DeviceSession, DeviceTransport};

use super::{open_handle, OperationContext, OperationState};

/// Open a client and send `payload` through it once.
///
/// The hub's acknowledgement is reported on `Channel::Send` as
/// `IoT Hub responded to message '<payload>' with status <STATUS>` whenever it arrives.
/// Failures to open or to hand the message to the transport are reported on the same channel.
/// The returned handle is left open; closing it is up to the caller or the operation's guard.
pub async fn send_one_message<T>(
    transport: &T,
    params: &ConnectionParameters,
    payload: &str,
    context: &OperationContext<T::Session>,
) -> Option<ConnectionHandle<T::Session>>
where
    T: DeviceTransport,
{
    info!("Attempting to send a message.");
    let handle = open_handle(transport, params, Channel::Send, context).await?;

    let callback_context = CallbackContext::new(Some(payload.to_string()));
    let (on_complete, acknowledgement) = event_callback();

    context.set_state(OperationState::AwaitingCallback);
    let message = Message::new(payload.to_string());
    if let Err(e) = handle.session().send_event_async(message, on_complete) {
        // the handle stays in the slot so the guard still closes it
        context.report(Channel::Send, &e.to_string());
        return Some(handle);
    }

    let dispatch_context = context.clone();
    let dispatcher = tokio::spawn(async move {
        match acknowledgement.await {
            Ok(status) => {
                dispatch_context.report(Channel::Send, &callback_context.send_response(status));
                dispatch_context.set_state(OperationState::CallbackReceived);
            }
            Err(_) => debug!("Send completion dropped without an acknowledgement"),
        }
    });
    context.track(dispatcher);

    Some(handle)
}
