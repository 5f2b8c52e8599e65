/// Decoder for the positional sub-GHz text frame
///
/// Frame grammar: a 2-digit sequence counter followed by repeating groups of a
/// 2-letter key and a 4-character value.
use log::{debug, warn};

use super::*;
use crate::models::{Automation, SensorSnapshot};

/// Canonical empty frame, also used to seed a new listen session
pub const SGHZ_DEFAULT_FRAME: &str =
    "00bt0000bh0000kt0000kh0000ot0000oh0000dhxoffadxoffco0000pm0000";

const COUNTER_SIZE: usize = 2;
const KEY_SIZE: usize = 2;
const FIELD_SIZE: usize = 4;

/// State carried between decodes: the last processed counter and the layout
/// of the previously decoded frame, used to locate each key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SghzCursor {
    pub last_counter: u8,
    pub layout: String,
}

impl Default for SghzCursor {
    fn default() -> Self {
        Self {
            last_counter: 0,
            layout: SGHZ_DEFAULT_FRAME.to_string(),
        }
    }
}

/// Value of `key` in `frame`, at the offset the key has in `layout`
fn field<'a>(frame: &'a str, layout: &str, key: &str) -> Option<&'a str> {
    let pos = layout.find(key)? + KEY_SIZE;
    frame.get(pos..pos + FIELD_SIZE)
}

/// Decode a received frame into the snapshot.
///
/// Nothing happens when the frame repeats the last processed counter or when
/// no previous layout exists. Key offsets come from the previous frame's
/// layout, values are copied verbatim from the new frame.
///
/// # Returns
/// true if the snapshot was updated from this frame
pub fn decode_sghz(frame: &str, cursor: &mut SghzCursor, snapshot: &mut SensorSnapshot) -> bool {
    let counter = match frame.get(..COUNTER_SIZE).map(str::parse::<u8>) {
        Some(Ok(counter)) => counter,
        _ => {
            warn!("Sub-GHz frame without a valid counter: {:?}", frame);
            return false;
        }
    };

    if counter == cursor.last_counter || cursor.layout.is_empty() {
        debug!("Sub-GHz frame {} already processed", counter);
        return false;
    }
    cursor.last_counter = counter;

    let layout = cursor.layout.as_str();
    let fields = [
        (BEDROOM_TEMP_KEY, &mut snapshot.bedroom_temp),
        (BEDROOM_HUM_KEY, &mut snapshot.bedroom_hum),
        (KITCHEN_TEMP_KEY, &mut snapshot.kitchen_temp),
        (KITCHEN_HUM_KEY, &mut snapshot.kitchen_hum),
        (OUTSIDE_TEMP_KEY, &mut snapshot.outside_temp),
        (OUTSIDE_HUM_KEY, &mut snapshot.outside_hum),
        (CO2_KEY, &mut snapshot.co2),
        (PM2_5_KEY, &mut snapshot.pm2_5),
    ];
    for (key, target) in fields {
        match field(frame, layout, key) {
            Some(value) => *target = value.to_string(),
            None => debug!("Key [{}] missing from sub-GHz frame", key),
        }
    }

    if let Some(value) = field(frame, layout, DEHUM_KEY) {
        snapshot.set_power(value.contains("on"));
    }
    if let Some(value) = field(frame, layout, DEHUM_AUTOMATION_KEY) {
        snapshot.set_automation(Automation::from_text(value));
    }

    cursor.layout = frame.to_string();
    true
}
