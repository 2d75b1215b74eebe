use crate::err::*;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref RGX_SEGMENT: Regex = Regex::new(r"^([A-Za-z]+)=(.*)$").unwrap();
}

/// The transport protocol a device client talks to the hub with.
#[derive(Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Debug, Default)]
pub enum Protocol {
    #[default]
    Https,
    Amqps,
}

impl Protocol {
    /// Map a user selection to a protocol. Anything missing or unrecognised falls back to HTTPS.
    pub fn select(selection: Option<&str>) -> Protocol {
        match selection.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("https") => Protocol::Https,
            Some("amqps") => Protocol::Amqps,
            _ => {
                info!("Protocol unknown/not set, defaulting to HTTPS.");
                Protocol::Https
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Https => "HTTPS",
            Protocol::Amqps => "AMQPS",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything needed to open a device client against a hub.
#[derive(Clone, Deserialize, Serialize, PartialEq, Debug)]
pub struct ConnectionParameters {
    pub hub_id: String,
    pub device_id: String,
    pub device_key: String,
    pub protocol: Protocol,
}

impl ConnectionParameters {
    pub fn new(hub_id: &str, device_id: &str, device_key: &str, protocol: Protocol) -> Self {
        Self {
            hub_id: hub_id.to_string(),
            device_id: device_id.to_string(),
            device_key: device_key.to_string(),
            protocol,
        }
    }

    /// Build parameters from raw user input. Fields are trimmed and the protocol selection
    /// goes through `Protocol::select`.
    pub fn from_fields(hub_id: &str, device_id: &str, device_key: &str, protocol: Option<&str>) -> Self {
        Self::new(hub_id.trim(), device_id.trim(), device_key.trim(), Protocol::select(protocol))
    }

    pub fn connection_string(&self) -> String {
        format!(
            "HostName={};DeviceId={};SharedAccessKey={}",
            &self.hub_id, &self.device_id, &self.device_key
        )
    }
}

/// The parsed form of a device connection string.
#[derive(Clone, PartialEq, Debug)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
}

impl ConnectionString {
    pub fn parse(connection_string: &str) -> ProbeResult<Self> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;

        for segment in connection_string.split(';').filter(|s| !s.is_empty()) {
            let captures = RGX_SEGMENT.captures(segment).ok_or_else(|| {
                ProbeError::MalformedConnectionString(format!("Invalid segment: {}", segment))
            })?;
            let value = captures[2].to_string();
            match &captures[1] {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "SharedAccessKey" => shared_access_key = Some(value),
                other => debug!("Ignoring connection string segment {}", other),
            }
        }

        Ok(Self {
            host_name: required("HostName", host_name)?,
            device_id: required("DeviceId", device_id)?,
            shared_access_key: required("SharedAccessKey", shared_access_key)?,
        })
    }
}

fn required(name: &str, value: Option<String>) -> ProbeResult<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProbeError::MalformedConnectionString(format!("Missing {}", name))),
    }
}

#[test]
fn test_connection_string() {
    let params = ConnectionParameters::new("hub1", "dev1", "key1", Protocol::Https);
    assert_eq!("HostName=hub1;DeviceId=dev1;SharedAccessKey=key1", &params.connection_string());
}

#[test]
fn test_connection_string_follows_fields() {
    let mut params = ConnectionParameters::new("hub1", "dev1", "key1", Protocol::Amqps);
    params.device_id = "dev2".into();
    assert_eq!("HostName=hub1;DeviceId=dev2;SharedAccessKey=key1", &params.connection_string());
}

#[test]
fn test_from_fields_trims() {
    let params = ConnectionParameters::from_fields(" hub1 ", "dev1\n", "\tkey1", Some("AMQPS"));
    assert_eq!("HostName=hub1;DeviceId=dev1;SharedAccessKey=key1", &params.connection_string());
    assert_eq!(Protocol::Amqps, params.protocol);
}

#[test]
fn test_protocol_defaults_to_https() {
    assert_eq!(Protocol::Https, Protocol::select(None));
    assert_eq!(Protocol::Https, Protocol::select(Some("mqtt")));
    assert_eq!(Protocol::Https, Protocol::select(Some("")));
    assert_eq!(Protocol::Amqps, Protocol::select(Some("amqps")));
}

#[test]
fn test_parse_connection_string() {
    let parsed = ConnectionString::parse("HostName=hub1;DeviceId=dev1;SharedAccessKey=a2V5=").unwrap();
    assert_eq!("hub1", &parsed.host_name);
    assert_eq!("dev1", &parsed.device_id);
    assert_eq!("a2V5=", &parsed.shared_access_key);
}

#[test]
fn test_parse_connection_string_missing_parts() {
    assert!(matches!(
        ConnectionString::parse("HostName=hub1;DeviceId=dev1"),
        Err(ProbeError::MalformedConnectionString(_))
    ));
    assert!(matches!(
        ConnectionString::parse("HostName=;DeviceId=dev1;SharedAccessKey=k"),
        Err(ProbeError::MalformedConnectionString(_))
    ));
    assert!(matches!(
        ConnectionString::parse("garbage"),
        Err(ProbeError::MalformedConnectionString(_))
    ));
}
