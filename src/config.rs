use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::transport::uart::DEFAULT_BAUD;

// Persisted keys, also the environment variable names
pub const FRAME_URL_KEY: &str = "FRAME_URL";
pub const FRAME_SSID_KEY: &str = "FRAME_SSID";
pub const FRAME_PASS_KEY: &str = "FRAME_PASS";
pub const HA_URL_KEY: &str = "HA_URL";
pub const HA_URL_CMD_KEY: &str = "HA_URL_CMD";
pub const HA_SSID_KEY: &str = "HA_SSID";
pub const HA_PASS_KEY: &str = "HA_PASS";
pub const HA_POLLING_KEY: &str = "HA_POLLING";
pub const HA_CTRL_MODE_KEY: &str = "HA_CTRL_MODE";
pub const HA_RANDOMIZE_MAC_KEY: &str = "HA_RANDOMIZE_MAC";
pub const HA_TOKEN_KEY: &str = "HA_TOKEN";

// Host-side keys
pub const UART_PORT_KEY: &str = "UART_PORT";
pub const UART_BAUD_KEY: &str = "UART_BAUD";
pub const SGHZ_PORT_KEY: &str = "SGHZ_PORT";
pub const SGHZ_FREQUENCY_KEY: &str = "SGHZ_FREQUENCY";
pub const BEACON_NAME_KEY: &str = "BEACON_NAME";
pub const BLE_PSM_KEY: &str = "BLE_PSM";

const ALL_KEYS: [&str; 17] = [
    FRAME_URL_KEY,
    FRAME_SSID_KEY,
    FRAME_PASS_KEY,
    HA_URL_KEY,
    HA_URL_CMD_KEY,
    HA_SSID_KEY,
    HA_PASS_KEY,
    HA_POLLING_KEY,
    HA_CTRL_MODE_KEY,
    HA_RANDOMIZE_MAC_KEY,
    HA_TOKEN_KEY,
    UART_PORT_KEY,
    UART_BAUD_KEY,
    SGHZ_PORT_KEY,
    SGHZ_FREQUENCY_KEY,
    BEACON_NAME_KEY,
    BLE_PSM_KEY,
];

pub const DEFAULT_UART_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_SGHZ_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_SGHZ_FREQUENCY: u32 = 433_920_000;
pub const DEFAULT_BEACON_NAME: &str = "home-remote";
pub const DEFAULT_BLE_PSM: u16 = 0x0081;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be an index between 0 and {max}, got {value:?}")]
    InvalidIndex {
        key: &'static str,
        max: usize,
        value: String,
    },
    #[error("{key} is not a valid number: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} is not a valid URL: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Period between automatic sensor refreshes in Wi-Fi mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingInterval {
    Ms500,
    S1,
    S5,
    S10,
}

impl PollingInterval {
    const ALL: [PollingInterval; 4] = [Self::Ms500, Self::S1, Self::S5, Self::S10];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn period(self) -> Duration {
        Duration::from_millis(match self {
            Self::Ms500 => 500,
            Self::S1 => 1000,
            Self::S5 => 5000,
            Self::S10 => 10000,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ms500 => "500ms",
            Self::S1 => "1s",
            Self::S5 => "5s",
            Self::S10 => "10s",
        }
    }
}

/// Transport used by the home-automation screen, fixed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    WifiHttp,
    SubghzBleHome,
    BleSerial,
}

impl ControlMode {
    const ALL: [ControlMode; 3] = [Self::WifiHttp, Self::SubghzBleHome, Self::BleSerial];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WifiHttp => "Wi-Fi",
            Self::SubghzBleHome => "SubGHz/BLE",
            Self::BleSerial => "BT Serial",
        }
    }
}

/// Wi-Fi endpoint and credentials of one remote target
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiTarget {
    pub url: String,
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaSettings {
    pub sensors: WifiTarget,
    pub command_url: String,
    pub polling: PollingInterval,
    pub control_mode: ControlMode,
    pub randomize_mac: bool,
    pub token: String,
}

/// Hardware bindings of the Linux host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub uart_port: String,
    pub uart_baud: u32,
    pub sghz_port: String,
    pub sghz_frequency: u32,
    pub beacon_name: String,
    pub ble_psm: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub frame: WifiTarget,
    pub ha: HaSettings,
    pub host: HostSettings,
}

fn text(map: &HashMap<String, String>, key: &'static str, default: &str) -> String {
    match map.get(key) {
        Some(value) => value.trim().to_string(),
        None => {
            warn!("{} not set, using {:?}", key, default);
            default.to_string()
        }
    }
}

fn number<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match map.get(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.clone(),
        }),
        None => {
            warn!("{} not set, using default", key);
            Ok(default)
        }
    }
}

fn index<T>(
    map: &HashMap<String, String>,
    key: &'static str,
    max: usize,
    lookup: fn(usize) -> Option<T>,
) -> Result<T, ConfigError> {
    let raw = text(map, key, "0");
    raw.parse::<usize>()
        .ok()
        .and_then(lookup)
        .ok_or(ConfigError::InvalidIndex {
            key,
            max,
            value: raw,
        })
}

/// An empty URL means "not configured" and is accepted
fn url(map: &HashMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    let value = text(map, key, "");
    if !value.is_empty() {
        Url::parse(&value).map_err(|source| ConfigError::InvalidUrl { key, source })?;
    }
    Ok(value)
}

impl AppConfig {
    /// Load `.env` and the process environment
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let map: HashMap<String, String> = env::vars()
            .filter(|(key, _)| ALL_KEYS.contains(&key.as_str()))
            .collect();
        let config = Self::from_map(&map)?;

        info!(
            "Loaded configuration: mode {}, polling {}, uart {}",
            config.ha.control_mode.name(),
            config.ha.polling.name(),
            config.host.uart_port
        );
        Ok(config)
    }

    /// Build the runtime settings from a flat key/value map
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let frame = WifiTarget {
            url: url(map, FRAME_URL_KEY)?,
            ssid: text(map, FRAME_SSID_KEY, ""),
            password: text(map, FRAME_PASS_KEY, ""),
        };

        let ha = HaSettings {
            sensors: WifiTarget {
                url: url(map, HA_URL_KEY)?,
                ssid: text(map, HA_SSID_KEY, ""),
                password: text(map, HA_PASS_KEY, ""),
            },
            command_url: url(map, HA_URL_CMD_KEY)?,
            polling: index(map, HA_POLLING_KEY, 3, PollingInterval::from_index)?,
            control_mode: index(map, HA_CTRL_MODE_KEY, 2, ControlMode::from_index)?,
            randomize_mac: index(map, HA_RANDOMIZE_MAC_KEY, 1, |i| match i {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            })?,
            token: text(map, HA_TOKEN_KEY, ""),
        };

        let host = HostSettings {
            uart_port: text(map, UART_PORT_KEY, DEFAULT_UART_PORT),
            uart_baud: number(map, UART_BAUD_KEY, DEFAULT_BAUD)?,
            sghz_port: text(map, SGHZ_PORT_KEY, DEFAULT_SGHZ_PORT),
            sghz_frequency: number(map, SGHZ_FREQUENCY_KEY, DEFAULT_SGHZ_FREQUENCY)?,
            beacon_name: text(map, BEACON_NAME_KEY, DEFAULT_BEACON_NAME),
            ble_psm: number(map, BLE_PSM_KEY, DEFAULT_BLE_PSM)?,
        };

        Ok(Self { frame, ha, host })
    }

    /// Flat map of the runtime state, the inverse of `from_map`
    pub fn to_map(&self) -> HashMap<String, String> {
        let entries = [
            (FRAME_URL_KEY, self.frame.url.clone()),
            (FRAME_SSID_KEY, self.frame.ssid.clone()),
            (FRAME_PASS_KEY, self.frame.password.clone()),
            (HA_URL_KEY, self.ha.sensors.url.clone()),
            (HA_URL_CMD_KEY, self.ha.command_url.clone()),
            (HA_SSID_KEY, self.ha.sensors.ssid.clone()),
            (HA_PASS_KEY, self.ha.sensors.password.clone()),
            (HA_POLLING_KEY, self.ha.polling.index().to_string()),
            (HA_CTRL_MODE_KEY, self.ha.control_mode.index().to_string()),
            (HA_RANDOMIZE_MAC_KEY, u8::from(self.ha.randomize_mac).to_string()),
            (HA_TOKEN_KEY, self.ha.token.clone()),
            (UART_PORT_KEY, self.host.uart_port.clone()),
            (UART_BAUD_KEY, self.host.uart_baud.to_string()),
            (SGHZ_PORT_KEY, self.host.sghz_port.clone()),
            (SGHZ_FREQUENCY_KEY, self.host.sghz_frequency.to_string()),
            (BEACON_NAME_KEY, self.host.beacon_name.clone()),
            (BLE_PSM_KEY, self.host.ble_psm.to_string()),
        ];
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }
}
