use crate::message::{Message, StatusCode};

pub fn d2c_to_string(device_id: &str, message: &Message) -> String {
    format!("[H] <-- [{}] D2C   {}", device_id, message)
}

pub fn c2d_to_string(device_id: &str, message: &Message) -> String {
    format!("[H] --> [{}] C2D   {}", device_id, message)
}

pub fn ack_to_string(message_id: &str, status: StatusCode) -> String {
    format!("[H] --> [?] ACK   {} {}", message_id, status)
}

