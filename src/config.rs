use std::path::Path;
use std::time::Duration;

use crate::err::*;
use crate::guard::DEFAULT_CLIENT_TIMEOUT_MS;
use crate::params::ConnectionParameters;

/// The values a user types in: credentials, the message to send and a protocol choice.
#[derive(Clone, Deserialize, Serialize, PartialEq, Debug, Default)]
#[serde(default)]
pub struct InputFields {
    pub hub_id: String,
    pub device_id: String,
    pub device_key: String,
    pub message: String,
    pub protocol: Option<String>,
}

impl InputFields {
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters::from_fields(
            &self.hub_id,
            &self.device_id,
            &self.device_key,
            self.protocol.as_deref(),
        )
    }

    pub fn payload(&self) -> String {
        self.message.trim().to_string()
    }
}

#[derive(Clone, Deserialize, Serialize, PartialEq, Debug)]
#[serde(default)]
pub struct ProbeConfig {
    /// How long a client may stay open before it is forcibly closed.
    pub timeout_ms: u64,
    pub fields: InputFields,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            fields: InputFields::default(),
        }
    }
}

impl ProbeConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ProbeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProbeResult<()> {
        if self.timeout_ms == 0 {
            return Err(ProbeError::Config("timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Protocol;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(Duration::from_millis(30_000), config.timeout());
        assert_eq!(Protocol::Https, config.fields.connection_parameters().protocol);
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            r#"{ "fields": { "hub_id": " hub1 ", "device_id": "dev1", "device_key": "key1", "protocol": "amqps" } }"#,
        );
        let config = ProbeConfig::load(file.path()).unwrap();

        assert_eq!(30_000, config.timeout_ms);
        let params = config.fields.connection_parameters();
        assert_eq!("HostName=hub1;DeviceId=dev1;SharedAccessKey=key1", &params.connection_string());
        assert_eq!(Protocol::Amqps, params.protocol);
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let file = write_config(r#"{ "timeout_ms": 0 }"#);
        assert!(matches!(ProbeConfig::load(file.path()), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let file = write_config("{ not json");
        assert!(matches!(ProbeConfig::load(file.path()), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ProbeConfig::load(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(ProbeError::IOError(_))));
    }
}
