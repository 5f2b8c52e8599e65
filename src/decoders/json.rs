/// Decoder for the Home Assistant JSON sensor response (Wi-Fi mode)
use log::{debug, info, warn};
use serde_json::{Deserializer, Value};

use super::*;
use crate::models::{Automation, SensorSnapshot};

/// Maximum number of JSON tokens (objects, keys, values) scanned per response
pub const JSON_TOKEN_BUDGET: usize = 128;

/// Count tokens the way a flat JSON tokenizer would: every object, array,
/// key and primitive is one token
fn count_tokens(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(|v| 1 + count_tokens(v)).sum::<usize>(),
        Value::Array(items) => 1 + items.iter().map(count_tokens).sum::<usize>(),
        _ => 1,
    }
}

/// Raw text of a JSON value, without quotes for strings. Numbers keep their
/// wire spelling.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode a sensor response body into the snapshot.
///
/// The body is only considered when its first non-whitespace byte is `{`.
/// Keys absent from the response leave their field untouched. The automation
/// flag `ad` tags the dehumidifier status with `-A` or `-M`.
///
/// # Returns
/// true if a JSON object was found and scanned, false if there is nothing to
/// decode yet
pub fn decode_json(response: &str, snapshot: &mut SensorSnapshot) -> bool {
    let body = response.trim_start();
    if !body.starts_with('{') {
        info!("No json in last response, skipping");
        return false;
    }

    // Tolerate trailing bytes after the object, the co-processor may append some
    let value = match Deserializer::from_str(body).into_iter::<Value>().next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!("Malformed json in response: {}", e);
            return false;
        }
        None => return false,
    };

    let tokens = count_tokens(&value);
    if tokens > JSON_TOKEN_BUDGET {
        warn!(
            "Json response too large: {} tokens, budget {}",
            tokens, JSON_TOKEN_BUDGET
        );
        return false;
    }

    let map = match value {
        Value::Object(map) => map,
        _ => return false,
    };

    let fields = [
        (BEDROOM_TEMP_KEY, &mut snapshot.bedroom_temp),
        (BEDROOM_HUM_KEY, &mut snapshot.bedroom_hum),
        (KITCHEN_TEMP_KEY, &mut snapshot.kitchen_temp),
        (KITCHEN_HUM_KEY, &mut snapshot.kitchen_hum),
        (OUTSIDE_TEMP_KEY, &mut snapshot.outside_temp),
        (OUTSIDE_HUM_KEY, &mut snapshot.outside_hum),
        (DEHUM_KEY, &mut snapshot.dehum_status),
        (CO2_KEY, &mut snapshot.co2),
        (PM2_5_KEY, &mut snapshot.pm2_5),
    ];

    for (key, field) in fields {
        match map.get(key) {
            Some(value) => *field = value_text(value),
            None => debug!("Key [{}] missing from response", key),
        }
    }

    if let Some(value) = map.get(DEHUM_AUTOMATION_KEY) {
        let automation = match value {
            Value::Bool(true) => Automation::Auto,
            Value::Bool(false) => Automation::Manual,
            other => Automation::from_text(&value_text(other)),
        };
        snapshot.set_automation(automation);
    }

    true
}
