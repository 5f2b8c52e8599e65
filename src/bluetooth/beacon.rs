/// BTHome button beacon
///
/// Each command installs the session's advertising configuration, broadcasts
/// one BTHome packet for a fixed duration and returns to inactive. The beacon
/// state found at session start is restored at teardown.
use log::{debug, error, info};
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::models::{PressType, WorkerMessage};
use crate::radio::RadioError;
use crate::utils::format_mac;

/// Maximum legacy advertising payload
pub const MAX_ADV_DATA_SIZE: usize = 31;
pub const MAC_ADDR_SIZE: usize = 6;
pub const BEACON_DURATION: Duration = Duration::from_millis(1000);
pub const BEACON_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_TX_POWER_DBM: i8 = 6;

// AD structure types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported
const ADV_FLAGS: u8 = 0b0000_0110;
/// BTHome service UUID 0xFCD2, little-endian on air
pub const BTHOME_UUID16: u16 = 0xFCD2;
/// BTHome v2, unencrypted, irregular interval
const BTHOME_DEVICE_INFO: u8 = 0b0100_0100;
const BTHOME_PACKET_ID: u8 = 0x00;
const BTHOME_BUTTON: u8 = 0x3A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    Ch37,
    Ch38,
    Ch39,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

/// BTHome button event codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress = 0x01,
    LongPress = 0x04,
}

impl From<PressType> for ButtonEvent {
    fn from(press: PressType) -> Self {
        match press {
            PressType::Short => ButtonEvent::ShortPress,
            PressType::Long => ButtonEvent::LongPress,
        }
    }
}

/// Advertising parameters. The address is stored least significant byte
/// first, the order the controller expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub channel_map: ChannelMap,
    pub tx_power_dbm: i8,
    pub address_type: AddressType,
    pub address: [u8; MAC_ADDR_SIZE],
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            min_interval: BEACON_PERIOD,
            max_interval: BEACON_PERIOD,
            channel_map: ChannelMap::All,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            address_type: AddressType::Public,
            address: [0; MAC_ADDR_SIZE],
        }
    }
}

impl BeaconConfig {
    pub fn new(randomize_mac: bool) -> Self {
        let mut config = Self::default();
        if randomize_mac {
            config.randomize_mac();
        }
        config
    }

    /// Fill the address with random bytes as a static random address
    pub fn randomize_mac(&mut self) {
        rand::thread_rng().fill_bytes(&mut self.address);
        // Two most significant bits set, the last byte in storage order
        self.address[MAC_ADDR_SIZE - 1] |= 0xC0;
        self.address_type = AddressType::Random;
    }

    /// Address in display order
    pub fn mac_string(&self) -> String {
        let mut display = self.address;
        display.reverse();
        format_mac(&display)
    }
}

/// Beacon driver seam: stores a configuration and a payload and broadcasts
/// them while active
pub trait BeaconRadio: Send + 'static {
    fn config(&self) -> Option<BeaconConfig>;
    fn data(&self) -> Vec<u8>;
    fn is_active(&self) -> bool;
    fn set_config(&mut self, config: &BeaconConfig) -> Result<(), RadioError>;
    fn set_data(&mut self, data: &[u8]) -> Result<(), RadioError>;
    fn start(&mut self) -> Result<(), RadioError>;
    fn stop(&mut self) -> Result<(), RadioError>;
}

/// Beacon state found before a session took over the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconSnapshot {
    pub config: Option<BeaconConfig>,
    pub data: Vec<u8>,
    pub active: bool,
}

impl BeaconSnapshot {
    pub fn capture<R: BeaconRadio>(radio: &R) -> Self {
        Self {
            config: radio.config(),
            data: radio.data(),
            active: radio.is_active(),
        }
    }

    pub fn restore<R: BeaconRadio>(&self, radio: &mut R) -> Result<(), RadioError> {
        if radio.is_active() {
            radio.stop()?;
        }
        if let Some(config) = &self.config {
            radio.set_config(config)?;
            radio.set_data(&self.data)?;
        }
        if self.active {
            radio.start()?;
        }
        Ok(())
    }
}

/// Assemble the advertising payload: flags, BTHome service data with packet
/// id and button event, then the complete local name
pub fn build_packet(counter: u8, event: ButtonEvent, name: &str) -> Result<Vec<u8>, RadioError> {
    let mut packet = Vec::with_capacity(MAX_ADV_DATA_SIZE);

    packet.extend_from_slice(&[0x02, AD_TYPE_FLAGS, ADV_FLAGS]);

    let uuid = BTHOME_UUID16.to_le_bytes();
    packet.extend_from_slice(&[
        0x08,
        AD_TYPE_SERVICE_DATA_16,
        uuid[0],
        uuid[1],
        BTHOME_DEVICE_INFO,
        BTHOME_PACKET_ID,
        counter,
        BTHOME_BUTTON,
        event as u8,
    ]);

    let name = name.as_bytes();
    packet.push((name.len() + 1) as u8);
    packet.push(AD_TYPE_COMPLETE_NAME);
    packet.extend_from_slice(name);

    if packet.len() > MAX_ADV_DATA_SIZE {
        return Err(RadioError::PacketTooLarge {
            max: MAX_ADV_DATA_SIZE,
            size: packet.len(),
        });
    }
    Ok(packet)
}

/// Split an advertising payload into (type, value) records
pub fn ad_records(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut records = Vec::new();
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || len > tail.len() {
            break;
        }
        records.push((tail[0], &tail[1..len]));
        rest = &tail[len..];
    }
    records
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconStatus {
    Inactive,
    Busy,
}

struct BeaconWorker<R: BeaconRadio> {
    radio: R,
    config: BeaconConfig,
    name: String,
    counter: u8,
    duration: Duration,
    busy: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    timer_tx: mpsc::WeakSender<WorkerMessage>,
}

impl<R: BeaconRadio> BeaconWorker<R> {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) -> R {
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Stop => {
                    info!("Beacon worker: stop requested");
                    break;
                }
                WorkerMessage::StopBeacon => self.reset(),
                WorkerMessage::SendCommand(press) => self.send(press.into()),
                WorkerMessage::UpdateData => debug!("Beacon worker: nothing to update"),
            }
        }
        self.cancel_timer();
        self.busy.store(false, Ordering::Release);
        self.radio
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn stop_radio(&mut self) {
        if self.radio.is_active() {
            if let Err(e) = self.radio.stop() {
                error!("Failed to stop beacon: {}", e);
            }
        }
    }

    fn reset(&mut self) {
        info!("Resetting beacon...");
        self.stop_radio();
        self.busy.store(false, Ordering::Release);
    }

    fn send(&mut self, event: ButtonEvent) {
        self.busy.store(true, Ordering::Release);
        info!("Sending BTHome data...");
        self.stop_radio();

        if let Err(e) = self.radio.set_config(&self.config) {
            error!("Failed to configure beacon: {}", e);
            self.busy.store(false, Ordering::Release);
            return;
        }

        self.counter = self.counter.wrapping_add(1);
        let packet = match build_packet(self.counter, event, &self.name) {
            Ok(packet) => packet,
            Err(e) => {
                error!("{}", e);
                self.busy.store(false, Ordering::Release);
                return;
            }
        };

        if let Err(e) = self
            .radio
            .set_data(&packet)
            .and_then(|_| self.radio.start())
        {
            error!("Failed to start beacon: {}", e);
            self.busy.store(false, Ordering::Release);
            return;
        }

        self.cancel_timer();
        let timer_tx = self.timer_tx.clone();
        let duration = self.duration;
        self.timer = Some(tokio::spawn(async move {
            sleep(duration).await;
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx.send(WorkerMessage::StopBeacon).await;
            }
        }));
    }
}

/// Beacon worker bound to one session
pub struct BeaconSession<R: BeaconRadio> {
    tx: mpsc::Sender<WorkerMessage>,
    busy: Arc<AtomicBool>,
    worker: JoinHandle<R>,
    previous: BeaconSnapshot,
    mac: String,
}

impl<R: BeaconRadio> BeaconSession<R> {
    /// Capture the current beacon state and start the worker
    pub fn start(radio: R, config: BeaconConfig, name: &str, duration: Duration) -> Self {
        let previous = BeaconSnapshot::capture(&radio);
        let mac = config.mac_string();
        info!("Device name: {}, size: {}", name, name.len());
        info!("Current MAC address: {}", mac);

        let (tx, rx) = mpsc::channel(8);
        let busy = Arc::new(AtomicBool::new(false));
        let worker = BeaconWorker {
            radio,
            config,
            name: name.to_string(),
            counter: 0,
            duration,
            busy: busy.clone(),
            timer: None,
            timer_tx: tx.downgrade(),
        };
        let worker = tokio::spawn(worker.run(rx));

        Self {
            tx,
            busy,
            worker,
            previous,
            mac,
        }
    }

    pub fn status(&self) -> BeaconStatus {
        if self.busy.load(Ordering::Acquire) {
            BeaconStatus::Busy
        } else {
            BeaconStatus::Inactive
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// Queue a button event unless a burst is already on air
    pub async fn press(&self, press: PressType) -> bool {
        if self.status() == BeaconStatus::Busy {
            debug!("Beacon busy, ignoring {:?} press", press);
            return false;
        }
        self.tx.send(WorkerMessage::SendCommand(press)).await.is_ok()
    }

    /// Stop the worker and put back the beacon state found at start
    pub async fn stop(self) -> Result<R, RadioError> {
        let _ = self.tx.send(WorkerMessage::Stop).await;
        let mut radio = self.worker.await?;
        self.previous.restore(&mut radio)?;
        info!("Beacon state restored");
        Ok(radio)
    }
}
