/// Decoder for the fixed binary struct sent over the BLE serial link
use crate::models::{Automation, SensorSnapshot, TelemetryPacket};
use crate::utils::format_fixed2;

/// Copy a parsed packet into the snapshot: floats as two-decimal text,
/// integers as decimal text, flags as on/off with the automation tag
pub fn decode_packet(packet: &TelemetryPacket, snapshot: &mut SensorSnapshot) {
    snapshot.bedroom_temp = format_fixed2(packet.bedroom_temp);
    snapshot.bedroom_hum = format_fixed2(packet.bedroom_hum);
    snapshot.kitchen_temp = format_fixed2(packet.kitchen_temp);
    snapshot.kitchen_hum = format_fixed2(packet.kitchen_hum);
    snapshot.outside_temp = format_fixed2(packet.outside_temp);
    snapshot.outside_hum = format_fixed2(packet.outside_hum);

    snapshot.set_power(packet.dehum_sts != 0);
    snapshot.set_automation(if packet.dehum_aut_sts != 0 {
        Automation::Auto
    } else {
        Automation::Manual
    });

    snapshot.co2 = packet.co2.to_string();
    snapshot.pm2_5 = packet.pm2_5.to_string();
}
