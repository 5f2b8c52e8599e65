/// Normalized view model shared by every transport
use std::fmt;

/// Placeholder shown for a reading that has never been decoded
pub const NO_DATA: &str = "--";

/// Size of the packed telemetry struct written by the BLE serial peer
pub const TELEMETRY_PACKET_SIZE: usize = 6 * 4 + 2 + 2 * 2;

/// Transport-agnostic sensor readout used by the render path.
///
/// Every field is text in a shared convention: temperatures and humidities are
/// decimal strings, the dehumidifier status is `on`/`off` optionally followed by
/// `-A` (automatic) or `-M` (manual), CO2 and PM2.5 are integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSnapshot {
    pub bedroom_temp: String,
    pub bedroom_hum: String,
    pub kitchen_temp: String,
    pub kitchen_hum: String,
    pub outside_temp: String,
    pub outside_hum: String,
    pub dehum_status: String,
    pub co2: String,
    pub pm2_5: String,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            bedroom_temp: NO_DATA.to_string(),
            bedroom_hum: NO_DATA.to_string(),
            kitchen_temp: NO_DATA.to_string(),
            kitchen_hum: NO_DATA.to_string(),
            outside_temp: NO_DATA.to_string(),
            outside_hum: NO_DATA.to_string(),
            dehum_status: NO_DATA.to_string(),
            co2: NO_DATA.to_string(),
            pm2_5: NO_DATA.to_string(),
        }
    }
}

impl SensorSnapshot {
    /// Replace any previous automation tag on the dehumidifier status.
    ///
    /// Applying the same flag twice yields the same text.
    pub fn set_automation(&mut self, automation: Automation) {
        let base = self
            .dehum_status
            .strip_suffix(Automation::Auto.suffix())
            .or_else(|| self.dehum_status.strip_suffix(Automation::Manual.suffix()))
            .unwrap_or(&self.dehum_status)
            .to_string();
        self.dehum_status = format!("{}{}", base, automation.suffix());
    }

    pub fn set_power(&mut self, on: bool) {
        self.dehum_status = if on { "on" } else { "off" }.to_string();
    }
}

impl fmt::Display for SensorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bedroom {}C/{}% kitchen {}C/{}% outside {}C/{}% dehum {} co2 {} pm2.5 {}",
            self.bedroom_temp,
            self.bedroom_hum,
            self.kitchen_temp,
            self.kitchen_hum,
            self.outside_temp,
            self.outside_hum,
            self.dehum_status,
            self.co2,
            self.pm2_5
        )
    }
}

/// Dehumidifier automation sub-flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Automation {
    Auto,
    Manual,
}

impl Automation {
    pub fn suffix(self) -> &'static str {
        match self {
            Automation::Auto => "-A",
            Automation::Manual => "-M",
        }
    }

    /// Text values containing `on` mean the automation is enabled
    pub fn from_text(value: &str) -> Self {
        if value.contains("on") {
            Automation::Auto
        } else {
            Automation::Manual
        }
    }
}

/// Duration class of a button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressType {
    Short,
    Long,
}

/// Messages consumed by a transport worker task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMessage {
    Stop,
    UpdateData,
    SendCommand(PressType),
    /// End of a beacon burst, sent by the one-shot beacon timer
    StopBeacon,
}

/// Fixed-layout telemetry written by the BLE serial peer.
///
/// Wire layout (packed, little-endian, 30 bytes):
/// - 6 x f32: bedroom temp/hum, kitchen temp/hum, outside temp/hum
/// - u8 dehumidifier power, u8 dehumidifier automation
/// - u16 CO2, u16 PM2.5
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPacket {
    pub bedroom_temp: f32,
    pub bedroom_hum: f32,
    pub kitchen_temp: f32,
    pub kitchen_hum: f32,
    pub outside_temp: f32,
    pub outside_hum: f32,
    pub dehum_sts: u8,
    pub dehum_aut_sts: u8,
    pub co2: u16,
    pub pm2_5: u16,
}

impl TelemetryPacket {
    /// Parse a received payload; anything but the exact struct size is rejected
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != TELEMETRY_PACKET_SIZE {
            return None;
        }

        let f = |at: usize| f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let u = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);

        Some(Self {
            bedroom_temp: f(0),
            bedroom_hum: f(4),
            kitchen_temp: f(8),
            kitchen_hum: f(12),
            outside_temp: f(16),
            outside_hum: f(20),
            dehum_sts: data[24],
            dehum_aut_sts: data[25],
            co2: u(26),
            pm2_5: u(28),
        })
    }

    pub fn to_bytes(&self) -> [u8; TELEMETRY_PACKET_SIZE] {
        let mut out = [0u8; TELEMETRY_PACKET_SIZE];
        let floats = [
            self.bedroom_temp,
            self.bedroom_hum,
            self.kitchen_temp,
            self.kitchen_hum,
            self.outside_temp,
            self.outside_hum,
        ];
        for (i, value) in floats.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        out[24] = self.dehum_sts;
        out[25] = self.dehum_aut_sts;
        out[26..28].copy_from_slice(&self.co2.to_le_bytes());
        out[28..30].copy_from_slice(&self.pm2_5.to_le_bytes());
        out
    }
}
