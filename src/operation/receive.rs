use crate::callback::{message_callback, CallbackContext};
use crate::handle::ConnectionHandle;
use crate::params::ConnectionParameters;
use crate::reporter::Channel;
use crate::transport::{DeviceSession, DeviceTransport};

use super::{open_handle, OperationContext, OperationState};

/// Open a client and listen on it. Every delivered message is accepted and its body reported
/// verbatim on `Channel::Receive`, one report per message, in delivery order, until the handle
/// is closed.
pub async fn receive_messages<T>(
    transport: &T,
    params: &ConnectionParameters,
    context: &OperationContext<T::Session>,
) -> Option<ConnectionHandle<T::Session>>
where
    T: DeviceTransport,
{
    info!("Attempting to receive a message.");
    let handle = open_handle(transport, params, Channel::Receive, context).await?;

    let callback_context = CallbackContext::new(None);
    let (on_message, mut deliveries) = message_callback();

    context.set_state(OperationState::AwaitingCallback);
    if let Err(e) = handle.session().set_message_callback(on_message) {
        context.report(Channel::Receive, &e.to_string());
        return Some(handle);
    }

    let dispatch_context = context.clone();
    let dispatcher = tokio::spawn(async move {
        while let Some(message) = deliveries.recv().await {
            dispatch_context.report(Channel::Receive, &callback_context.receive_response(&message));
            dispatch_context.set_state(OperationState::CallbackReceived);
        }
        debug!("Message callback released");
    });
    context.track(dispatcher);

    Some(handle)
}
