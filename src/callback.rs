use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;

use crate::message::{Disposition, Message, StatusCode};
use crate::transport::{EventCallback, MessageCallback};

/// Data carried alongside an async request so its outcome can refer back to the input.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct CallbackContext {
    original_payload: Option<String>,
}

impl CallbackContext {
    pub fn new(original_payload: Option<String>) -> Self {
        Self { original_payload }
    }

    pub fn original_payload(&self) -> Option<&str> {
        self.original_payload.as_deref()
    }

    /// The text reported when the hub acknowledges a sent message.
    pub fn send_response(&self, status: StatusCode) -> String {
        format!(
            "IoT Hub responded to message '{}' with status {}",
            self.original_payload().unwrap_or_default(),
            status.name()
        )
    }

    /// The text reported for a delivered message: its body, verbatim.
    pub fn receive_response(&self, message: &Message) -> String {
        message.body_as_text()
    }
}

/// Build a completion callback that forwards the acknowledgement to the returned receiver.
/// The receiver errors if the transport drops the callback without calling it.
pub(crate) fn event_callback() -> (EventCallback, oneshot::Receiver<StatusCode>) {
    let (sender, receiver) = oneshot::channel();
    let callback: EventCallback = Box::new(move |status| {
        info!("A sent message was acknowledged by IoT Hub.");
        // nobody listening any more is fine
        let _ = sender.send(status);
    });
    (callback, receiver)
}

/// Build a message callback that forwards every delivery, in order, to the returned receiver
/// and accepts it. The receiver ends once the transport drops the callback.
pub(crate) fn message_callback() -> (MessageCallback, UnboundedReceiver<Message>) {
    let (sender, receiver) = unbounded_channel();
    let callback: MessageCallback = Box::new(move |message| {
        info!("A message was received from IoT Hub.");
        let _ = sender.send(message);
        Disposition::Complete
    });
    (callback, receiver)
}

#[test]
fn test_send_response() {
    let context = CallbackContext::new(Some("hello".into()));
    assert_eq!(
        "IoT Hub responded to message 'hello' with status OK",
        &context.send_response(StatusCode::Ok)
    );
}

#[test]
fn test_send_response_echoes_status_name() {
    let context = CallbackContext::new(Some("x".into()));
    assert_eq!(
        "IoT Hub responded to message 'x' with status THROTTLED",
        &context.send_response(StatusCode::Throttled)
    );
}

#[test]
fn test_receive_context_is_empty() {
    assert_eq!(None, CallbackContext::new(None).original_payload());
}

#[tokio::test]
async fn test_message_callback_accepts_and_forwards_in_order() {
    let (mut callback, mut receiver) = message_callback();
    assert_eq!(Disposition::Complete, callback(Message::new("one")));
    assert_eq!(Disposition::Complete, callback(Message::new("two")));
    drop(callback);

    assert_eq!("one", receiver.recv().await.unwrap().body_as_text());
    assert_eq!("two", receiver.recv().await.unwrap().body_as_text());
    assert!(receiver.recv().await.is_none());
}

#[tokio::test]
async fn test_dropped_event_callback_closes_receiver() {
    let (callback, receiver) = event_callback();
    drop(callback);
    assert!(receiver.await.is_err());
}
