/// Telemetry decoders, one per transport.
///
/// Each decoder turns a raw payload into updates on a `SensorSnapshot` and
/// never fails: missing or malformed input leaves fields at their last value.
pub mod json;
pub mod packet;
pub mod sghz;

pub use json::decode_json;
pub use packet::decode_packet;
pub use sghz::{decode_sghz, SghzCursor, SGHZ_DEFAULT_FRAME};

// Two-letter keys shared by the JSON and sub-GHz encodings
pub const BEDROOM_TEMP_KEY: &str = "bt";
pub const BEDROOM_HUM_KEY: &str = "bh";
pub const KITCHEN_TEMP_KEY: &str = "kt";
pub const KITCHEN_HUM_KEY: &str = "kh";
pub const OUTSIDE_TEMP_KEY: &str = "ot";
pub const OUTSIDE_HUM_KEY: &str = "oh";
pub const DEHUM_KEY: &str = "dh";
pub const DEHUM_AUTOMATION_KEY: &str = "ad";
pub const CO2_KEY: &str = "co";
pub const PM2_5_KEY: &str = "pm";
