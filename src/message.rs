use bytes::Bytes;
use std::fmt;

/// A message exchanged between a device and the hub.
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    pub message_id: String,
    pub body: Bytes,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            body: body.into(),
        }
    }

    /// The body decoded as UTF-8. Invalid sequences are replaced rather than rejected.
    pub fn body_as_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} bytes)", &self.message_id, self.body.len())
    }
}

/// The status the hub acknowledges a device-to-cloud message with.
#[derive(Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Debug)]
pub enum StatusCode {
    Ok,
    OkEmpty,
    BadFormat,
    Unauthorized,
    TooManyDevices,
    HubOrDeviceIdNotFound,
    PreconditionFailed,
    RequestEntityTooLarge,
    Throttled,
    InternalServerError,
    ServerBusy,
    Error,
    MessageExpired,
    MessageCancelledOnClose,
}

impl StatusCode {
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::OkEmpty => "OK_EMPTY",
            StatusCode::BadFormat => "BAD_FORMAT",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::TooManyDevices => "TOO_MANY_DEVICES",
            StatusCode::HubOrDeviceIdNotFound => "HUB_OR_DEVICE_ID_NOT_FOUND",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            StatusCode::RequestEntityTooLarge => "REQUEST_ENTITY_TOO_LARGE",
            StatusCode::Throttled => "THROTTLED",
            StatusCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            StatusCode::ServerBusy => "SERVER_BUSY",
            StatusCode::Error => "ERROR",
            StatusCode::MessageExpired => "MESSAGE_EXPIRED",
            StatusCode::MessageCancelledOnClose => "MESSAGE_CANCELLED_ONCLOSE",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The verdict a message callback hands back to the transport.
#[derive(Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Debug)]
pub enum Disposition {
    /// Something expected happened on the device leading to a positive result
    Complete,
    /// Something unexpected happened on the device leading to an unknown result
    Abandon,
    /// Something expected happened on the device leading to a negative result
    Reject,
}

#[test]
fn test_status_names() {
    assert_eq!("OK", StatusCode::Ok.name());
    assert_eq!("MESSAGE_CANCELLED_ONCLOSE", StatusCode::MessageCancelledOnClose.to_string());
    assert_eq!("HUB_OR_DEVICE_ID_NOT_FOUND", StatusCode::HubOrDeviceIdNotFound.to_string());
}

#[test]
fn test_body_as_text_is_lossy() {
    assert_eq!("hello", Message::new("hello").body_as_text());
    assert_eq!("a\u{FFFD}b", Message::new(vec![b'a', 0xff, b'b']).body_as_text());
}
