//! # Node Configuration
//!
//! Configuration is read once at startup from a key→string source (the
//! `CONFIG.TXT` file on the node's storage card) and stays constant for the
//! whole session.
//!
//! ## Keys
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `NODE_ID` | required | This node's id |
//! | `NETWORK_ID` | 1 | Local network id |
//! | `COLLECTOR_ID` | none | Id of the collector node |
//! | `RF95_FREQ` | 915.0 | Channel frequency in MHz |
//! | `TX_POWER` | 13 | Transmit power in dBm |
//! | `RFM95_CS` / `RFM95_RST` / `RFM95_INT` | 8 / 4 / 3 | Radio pins |
//! | `RETRANSMIT_DELAY` | 1000 | Relay delay in ms |
//! | `RESET_THRESHOLD` | 5 | Backward gap treated as origin reboot |
//! | `LISTEN_WINDOW_MIN` / `LISTEN_WINDOW_MAX` | 1000 / 2000 | Listen window bounds in ms |
//! | `RADIO_INIT_RETRY_DELAY` | 1000 | Wait between radio init attempts in ms |
//! | `LOG_FILE` | sensorgrid.log | Local frame log |
//! | `WIFI_SSID` / `WIFI_PASS` | empty | Uplink credentials |
//! | `API_HOST` (or `API_SERVER`) / `API_PORT` | none / 80 | Uplink endpoint |
//!
//! Sensor data registers (`DATA_0`..`DATA_9`, `GPS_MODULE`) are resolved by
//! [`crate::sensors::DataRegisters`].

use core::str::FromStr;

use crate::{
    ListenWindow, DEFAULT_LISTEN_WINDOW_MAX_MS, DEFAULT_LISTEN_WINDOW_MIN_MS, DEFAULT_RADIO_INIT_RETRY_DELAY_MS, DEFAULT_RESET_THRESHOLD,
    DEFAULT_RETRANSMIT_DELAY_MS,
};

pub const DEFAULT_NETWORK_ID: u8 = 1;
pub const DEFAULT_RF95_FREQ: f32 = 915.0;
pub const DEFAULT_TX_POWER: i8 = 13;
pub const DEFAULT_RFM95_CS: u8 = 8;
pub const DEFAULT_RFM95_RST: u8 = 4;
pub const DEFAULT_RFM95_INT: u8 = 3;
pub const DEFAULT_API_PORT: u16 = 80;
pub const DEFAULT_LOG_FILE: &str = "sensorgrid.log";

/// Read-only key→string configuration lookup
pub trait ConfigSource {
    /// Value of `key`, `None` when the key is absent or empty
    fn get(&self, key: &str) -> Option<&str>;
}

/// `KEY=VALUE` text configuration
///
/// Blank lines and lines starting with `#` are ignored. Keys and values are
/// trimmed; the first occurrence of a key wins.
///
/// # Example
/// ```rust
/// use sensorgrid_relay::{ConfigSource, KeyValueConfig};
///
/// let config = KeyValueConfig::new("# node\nNODE_ID=2\nNETWORK_ID = 4\n");
/// assert_eq!(config.get("NETWORK_ID"), Some("4"));
/// ```
pub struct KeyValueConfig<'a> {
    text: &'a str,
}

impl<'a> KeyValueConfig<'a> {
    pub const fn new(text: &'a str) -> Self {
        KeyValueConfig { text }
    }
}

impl ConfigSource for KeyValueConfig<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .find(|(name, _)| name.trim() == key)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

impl<const N: usize> ConfigSource for [(&str, &str); N] {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(name, _)| *name == key).map(|(_, value)| *value).filter(|value| !value.is_empty())
    }
}

/// Configuration errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is absent
    MissingKey(&'static str),
    /// A value could not be parsed
    InvalidValue(&'static str),
    /// The listen window is empty
    InvalidListenWindow { min_ms: u64, max_ms: u64 },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::MissingKey(key) => write!(f, "missing configuration key {}", key),
            ConfigError::InvalidValue(key) => write!(f, "invalid value for configuration key {}", key),
            ConfigError::InvalidListenWindow { min_ms, max_ms } => {
                write!(f, "listen window {}..{} ms is empty", min_ms, max_ms)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Physical radio parameters handed to [`crate::RadioChannel::init`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadioSettings {
    /// Channel frequency in MHz
    pub frequency_mhz: f32,
    /// Transmit power in dBm
    pub tx_power: i8,
    pub chip_select_pin: u8,
    pub reset_pin: u8,
    pub interrupt_pin: u8,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioSettings {
    pub const fn new() -> Self {
        RadioSettings {
            frequency_mhz: DEFAULT_RF95_FREQ,
            tx_power: DEFAULT_TX_POWER,
            chip_select_pin: DEFAULT_RFM95_CS,
            reset_pin: DEFAULT_RFM95_RST,
            interrupt_pin: DEFAULT_RFM95_INT,
        }
    }

    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        Ok(RadioSettings {
            frequency_mhz: parse_or(source, "RF95_FREQ", DEFAULT_RF95_FREQ)?,
            tx_power: parse_or(source, "TX_POWER", DEFAULT_TX_POWER)?,
            chip_select_pin: parse_or(source, "RFM95_CS", DEFAULT_RFM95_CS)?,
            reset_pin: parse_or(source, "RFM95_RST", DEFAULT_RFM95_RST)?,
            interrupt_pin: parse_or(source, "RFM95_INT", DEFAULT_RFM95_INT)?,
        })
    }
}

/// Session constants of one node
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeConfiguration {
    pub node_id: u8,
    pub network_id: u8,
    pub collector_id: Option<u8>,
    pub radio: RadioSettings,
    /// Delay before a relayed frame goes on air, in milliseconds
    pub retransmit_delay_ms: u64,
    /// Backward sequence gap treated as an origin reboot
    pub reset_threshold: u32,
    /// Listen window lower bound in milliseconds
    pub listen_window_min_ms: u64,
    /// Listen window upper bound (exclusive) in milliseconds
    pub listen_window_max_ms: u64,
    /// Wait between radio init attempts in milliseconds
    pub radio_init_retry_delay_ms: u64,
}

impl NodeConfiguration {
    /// Configuration with every tunable at its default
    pub const fn new(node_id: u8, network_id: u8) -> Self {
        NodeConfiguration {
            node_id,
            network_id,
            collector_id: None,
            radio: RadioSettings::new(),
            retransmit_delay_ms: DEFAULT_RETRANSMIT_DELAY_MS,
            reset_threshold: DEFAULT_RESET_THRESHOLD,
            listen_window_min_ms: DEFAULT_LISTEN_WINDOW_MIN_MS,
            listen_window_max_ms: DEFAULT_LISTEN_WINDOW_MAX_MS,
            radio_init_retry_delay_ms: DEFAULT_RADIO_INIT_RETRY_DELAY_MS,
        }
    }

    /// Reads the node configuration, filling absent keys with defaults
    ///
    /// # Errors
    /// * `MissingKey("NODE_ID")` - the node id is not configured
    /// * `InvalidValue(key)` - a present value does not parse
    /// * `InvalidListenWindow` - the window bounds leave no room for a draw
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        let node_id = parse_required(source, "NODE_ID")?;
        let collector_id = match source.get("COLLECTOR_ID") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::InvalidValue("COLLECTOR_ID"))?),
            None => None,
        };

        let config = NodeConfiguration {
            node_id,
            network_id: parse_or(source, "NETWORK_ID", DEFAULT_NETWORK_ID)?,
            collector_id,
            radio: RadioSettings::from_source(source)?,
            retransmit_delay_ms: parse_or(source, "RETRANSMIT_DELAY", DEFAULT_RETRANSMIT_DELAY_MS)?,
            reset_threshold: parse_or(source, "RESET_THRESHOLD", DEFAULT_RESET_THRESHOLD)?,
            listen_window_min_ms: parse_or(source, "LISTEN_WINDOW_MIN", DEFAULT_LISTEN_WINDOW_MIN_MS)?,
            listen_window_max_ms: parse_or(source, "LISTEN_WINDOW_MAX", DEFAULT_LISTEN_WINDOW_MAX_MS)?,
            radio_init_retry_delay_ms: parse_or(source, "RADIO_INIT_RETRY_DELAY", DEFAULT_RADIO_INIT_RETRY_DELAY_MS)?,
        };

        config.listen_window()?;
        Ok(config)
    }

    /// Listen window of the receive cycle
    ///
    /// # Errors
    /// `InvalidListenWindow` if the bounds leave no room for a draw
    pub fn listen_window(&self) -> Result<ListenWindow, ConfigError> {
        ListenWindow::with(self.listen_window_min_ms, self.listen_window_max_ms)
    }

    /// Returns true if this node is the network's collector
    pub fn is_collector(&self) -> bool {
        self.collector_id == Some(self.node_id)
    }
}

/// Network upload endpoint and credentials
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UplinkSettings<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
    pub host: &'a str,
    pub port: u16,
}

impl<'a> UplinkSettings<'a> {
    /// Reads the uplink endpoint
    ///
    /// # Returns
    /// `Ok(None)` when neither `API_HOST` nor `API_SERVER` is configured, the
    /// node then has no network path at all.
    pub fn from_source<S: ConfigSource + ?Sized>(source: &'a S) -> Result<Option<Self>, ConfigError> {
        let Some(host) = source.get("API_HOST").or_else(|| source.get("API_SERVER")) else {
            return Ok(None);
        };
        Ok(Some(UplinkSettings {
            ssid: source.get("WIFI_SSID").unwrap_or(""),
            password: source.get("WIFI_PASS").unwrap_or(""),
            host,
            port: parse_or(source, "API_PORT", DEFAULT_API_PORT)?,
        }))
    }
}

/// Local frame log file name
pub fn log_file<S: ConfigSource + ?Sized>(source: &S) -> &str {
    source.get("LOG_FILE").unwrap_or(DEFAULT_LOG_FILE)
}

/// Interprets a flag value (`1`, `true`, `yes`, `on` in any case)
pub(crate) fn is_enabled<S: ConfigSource + ?Sized>(source: &S, key: &str) -> bool {
    match source.get(key) {
        Some(value) => ["1", "true", "yes", "on"].iter().any(|flag| value.eq_ignore_ascii_case(flag)),
        None => false,
    }
}

fn parse_or<S: ConfigSource + ?Sized, T: FromStr>(source: &S, key: &'static str, default: T) -> Result<T, ConfigError> {
    match source.get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

fn parse_required<S: ConfigSource + ?Sized, T: FromStr>(source: &S, key: &'static str) -> Result<T, ConfigError> {
    let value = source.get(key).ok_or(ConfigError::MissingKey(key))?;
    value.parse().map_err(|_| ConfigError::InvalidValue(key))
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    const CONFIG_TXT: &str = "\
# SensorGrid node
NODE_ID=3
NETWORK_ID = 7
COLLECTOR_ID=1

RF95_FREQ=868.1
TX_POWER=20
RETRANSMIT_DELAY=250
RESET_THRESHOLD=8
LISTEN_WINDOW_MIN=500
LISTEN_WINDOW_MAX=900
LOG_FILE=NODE3.CSV
API_HOST=collector.local
API_PORT=8080
WIFI_SSID=grid
WIFI_PASS=secret
";

    #[test]
    fn key_value_text_is_parsed() {
        let source = KeyValueConfig::new(CONFIG_TXT);
        assert_eq!(source.get("NODE_ID"), Some("3"));
        assert_eq!(source.get("NETWORK_ID"), Some("7"));
        assert_eq!(source.get("# SensorGrid node"), None);
        assert_eq!(source.get("MISSING"), None);
    }

    #[test]
    fn empty_values_count_as_absent() {
        let source = KeyValueConfig::new("DATA_0=\nDATA_1=FAKE_3");
        assert_eq!(source.get("DATA_0"), None);
        assert_eq!(source.get("DATA_1"), Some("FAKE_3"));
    }

    #[test]
    fn node_configuration_reads_all_keys() {
        let source = KeyValueConfig::new(CONFIG_TXT);
        let config = NodeConfiguration::from_source(&source).unwrap();
        assert_eq!(config.node_id, 3);
        assert_eq!(config.network_id, 7);
        assert_eq!(config.collector_id, Some(1));
        assert!(!config.is_collector());
        assert_eq!(config.radio.frequency_mhz, 868.1);
        assert_eq!(config.radio.tx_power, 20);
        assert_eq!(config.radio.chip_select_pin, DEFAULT_RFM95_CS);
        assert_eq!(config.retransmit_delay_ms, 250);
        assert_eq!(config.reset_threshold, 8);
        assert_eq!(config.listen_window_min_ms, 500);
        assert_eq!(config.listen_window_max_ms, 900);
        assert_eq!(log_file(&source), "NODE3.CSV");
    }

    #[test]
    fn absent_keys_fall_back_to_defaults() {
        let config = NodeConfiguration::from_source(&[("NODE_ID", "2")]).unwrap();
        assert_eq!(config, NodeConfiguration::new(2, DEFAULT_NETWORK_ID));
        assert_eq!(log_file(&[("NODE_ID", "2")]), DEFAULT_LOG_FILE);
    }

    #[test]
    fn missing_node_id_is_an_error() {
        let result = NodeConfiguration::from_source(&[("NETWORK_ID", "1")]);
        assert_eq!(result, Err(ConfigError::MissingKey("NODE_ID")));
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let result = NodeConfiguration::from_source(&[("NODE_ID", "2"), ("TX_POWER", "loud")]);
        assert_eq!(result, Err(ConfigError::InvalidValue("TX_POWER")));
        let result = NodeConfiguration::from_source(&[("NODE_ID", "300")]);
        assert_eq!(result, Err(ConfigError::InvalidValue("NODE_ID")));
    }

    #[test]
    fn empty_listen_window_is_rejected() {
        let result = NodeConfiguration::from_source(&[("NODE_ID", "2"), ("LISTEN_WINDOW_MIN", "2000"), ("LISTEN_WINDOW_MAX", "2000")]);
        assert_eq!(result, Err(ConfigError::InvalidListenWindow { min_ms: 2000, max_ms: 2000 }));
    }

    #[test]
    fn uplink_settings_require_a_host() {
        assert_eq!(UplinkSettings::from_source(&[("WIFI_SSID", "grid")]), Ok(None));

        let source = KeyValueConfig::new(CONFIG_TXT);
        let uplink = UplinkSettings::from_source(&source).unwrap().unwrap();
        assert_eq!(uplink.host, "collector.local");
        assert_eq!(uplink.port, 8080);
        assert_eq!(uplink.ssid, "grid");
        assert_eq!(uplink.password, "secret");

        let server_only = [("API_SERVER", "10.0.0.5")];
        let uplink = UplinkSettings::from_source(&server_only).unwrap().unwrap();
        assert_eq!(uplink.host, "10.0.0.5");
        assert_eq!(uplink.port, DEFAULT_API_PORT);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(is_enabled(&[("GPS_MODULE", "TRUE")], "GPS_MODULE"));
        assert!(is_enabled(&[("GPS_MODULE", "1")], "GPS_MODULE"));
        assert!(!is_enabled(&[("GPS_MODULE", "0")], "GPS_MODULE"));
        assert!(!is_enabled(&[("NODE_ID", "1")], "GPS_MODULE"));
    }

    #[test]
    fn collector_node_knows_its_role() {
        let config = NodeConfiguration::from_source(&[("NODE_ID", "1"), ("COLLECTOR_ID", "1")]).unwrap();
        assert!(config.is_collector());
    }
}
