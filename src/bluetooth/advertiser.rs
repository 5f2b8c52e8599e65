/// BlueZ-backed beacon radio
///
/// BlueZ builds the advertising payload itself, so the raw BTHome packet is
/// mapped back onto an `Advertisement`: service data and local name are
/// carried over, the flags record is left to BlueZ.
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{Adapter, Session, Uuid};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use super::beacon::{
    ad_records, AddressType, BeaconConfig, BeaconRadio, ChannelMap, AD_TYPE_COMPLETE_NAME,
    AD_TYPE_FLAGS, AD_TYPE_SERVICE_DATA_16,
};
use crate::radio::RadioError;

/// Bluetooth base UUID, 0000xxxx-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | (u128::from(short) << 96))
}

enum AdvCommand {
    Start(Advertisement),
    Stop,
}

pub struct BluerAdvertiser {
    config: Option<BeaconConfig>,
    data: Vec<u8>,
    active: bool,
    commands: mpsc::UnboundedSender<AdvCommand>,
}

impl BluerAdvertiser {
    pub async fn new() -> Result<Self, RadioError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("Beacon using Bluetooth adapter {}", adapter.name());

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(session, adapter, rx));

        Ok(Self {
            config: None,
            data: Vec::new(),
            active: false,
            commands,
        })
    }

    fn submit(&self, command: AdvCommand) -> Result<(), RadioError> {
        self.commands
            .send(command)
            .map_err(|_| RadioError::Unavailable("advertising driver stopped".to_string()))
    }
}

/// Translate configuration and raw payload into a BlueZ advertisement
pub fn to_advertisement(config: &BeaconConfig, data: &[u8]) -> Advertisement {
    let mut service_data = BTreeMap::new();
    let mut local_name = None;

    for (ad_type, value) in ad_records(data) {
        match ad_type {
            AD_TYPE_SERVICE_DATA_16 if value.len() >= 2 => {
                let uuid = u16::from_le_bytes([value[0], value[1]]);
                service_data.insert(uuid_from_u16(uuid), value[2..].to_vec());
            }
            AD_TYPE_COMPLETE_NAME => {
                local_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_FLAGS => {}
            other => debug!("Dropping AD record 0x{:02X}", other),
        }
    }

    if config.channel_map != ChannelMap::All {
        debug!("Channel map {:?} is managed by BlueZ", config.channel_map);
    }

    Advertisement {
        advertisement_type: Type::Broadcast,
        service_data,
        local_name,
        min_interval: Some(config.min_interval),
        max_interval: Some(config.max_interval),
        tx_power: Some(i16::from(config.tx_power_dbm)),
        ..Default::default()
    }
}

impl BeaconRadio for BluerAdvertiser {
    fn config(&self) -> Option<BeaconConfig> {
        self.config.clone()
    }

    fn data(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_config(&mut self, config: &BeaconConfig) -> Result<(), RadioError> {
        if config.address_type == AddressType::Random {
            warn!(
                "Random address {} must be set on the adapter, BlueZ keeps its own",
                config.mac_string()
            );
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.data = data.to_vec();
        Ok(())
    }

    fn start(&mut self) -> Result<(), RadioError> {
        let config = self.config.clone().unwrap_or_default();
        self.submit(AdvCommand::Start(to_advertisement(&config, &self.data)))?;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RadioError> {
        self.submit(AdvCommand::Stop)?;
        self.active = false;
        Ok(())
    }
}

/// Owns the advertisement handle; dropping the handle unregisters it
async fn drive(_session: Session, adapter: Adapter, mut rx: mpsc::UnboundedReceiver<AdvCommand>) {
    let mut current: Option<AdvertisementHandle> = None;

    while let Some(command) = rx.recv().await {
        // Release the previous registration first
        current.take();
        if let AdvCommand::Start(advertisement) = command {
            match adapter.advertise(advertisement).await {
                Ok(handle) => current = Some(handle),
                Err(e) => error!("Failed to register advertisement: {}", e),
            }
        }
    }
    debug!("Advertising driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::beacon::{build_packet, ButtonEvent, BTHOME_UUID16};

    #[test]
    fn bthome_uuid_expands_to_full_uuid() {
        assert_eq!(
            uuid_from_u16(BTHOME_UUID16).to_string(),
            "0000fcd2-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn packet_maps_to_advertisement() {
        let config = BeaconConfig::default();
        let packet = build_packet(9, ButtonEvent::ShortPress, "remote").unwrap();
        let adv = to_advertisement(&config, &packet);

        assert_eq!(adv.local_name.as_deref(), Some("remote"));
        assert_eq!(
            adv.service_data.get(&uuid_from_u16(BTHOME_UUID16)),
            Some(&vec![0x44, 0x00, 9, 0x3A, 0x01])
        );
        assert_eq!(adv.tx_power, Some(6));
        assert_eq!(adv.min_interval, Some(config.min_interval));
    }
}
