/// BLE serial link to the sensor hub
///
/// The hub writes the packed telemetry struct; we write short text commands
/// such as `dh:toggle`. The L2CAP backend uses sequential-packet sockets so
/// every struct arrives as one message.
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::l2cap::{SeqPacket, SeqPacketListener, SocketAddr};
use bluer::{AddressType, Session};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{TelemetryPacket, TELEMETRY_PACKET_SIZE};
use crate::radio::RadioError;
use crate::utils::format_datetime;
use crate::view::SharedView;

pub const SERIAL_BUFFER_SIZE: usize = 64;
pub const DEVICE_NAME_PREFIX: &str = "HA Rem";
/// Packet age after which the link shows no data
pub const NO_DATA_AFTER: time::Duration = time::Duration::seconds(10);
/// Packet age after which the peer is considered gone
pub const LOST_AFTER: time::Duration = time::Duration::seconds(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Connected,
    Data(Vec<u8>),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtSerialState {
    Checking,
    Inactive,
    Waiting,
    Receiving,
    NoData,
    Lost,
}

/// Serial profile seam
#[allow(async_fn_in_trait)]
pub trait SerialProfile: Send + 'static {
    /// Start advertising and deliver link events until stopped
    async fn start(&mut self, events: mpsc::Sender<SerialEvent>) -> Result<(), RadioError>;
    async fn write(&mut self, data: &[u8]) -> Result<(), RadioError>;
    /// Disconnect and give the radio back to the default profile
    async fn stop(&mut self) -> Result<(), RadioError>;
}

#[derive(Debug)]
struct Link {
    state: BtSerialState,
    last_packet: Option<OffsetDateTime>,
}

impl Link {
    fn state_at(&self, now: OffsetDateTime) -> BtSerialState {
        match (self.state, self.last_packet) {
            (BtSerialState::Receiving, Some(last)) if now - last > LOST_AFTER => {
                BtSerialState::Lost
            }
            (BtSerialState::Receiving, Some(last)) if now - last > NO_DATA_AFTER => {
                BtSerialState::NoData
            }
            (state, _) => state,
        }
    }
}

fn lock(link: &Mutex<Link>) -> std::sync::MutexGuard<'_, Link> {
    match link.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct BleSerialSession<P: SerialProfile> {
    profile: P,
    link: Arc<Mutex<Link>>,
    pump: JoinHandle<()>,
}

impl<P: SerialProfile> BleSerialSession<P> {
    pub async fn start(mut profile: P, view: SharedView) -> Result<Self, RadioError> {
        let link = Arc::new(Mutex::new(Link {
            state: BtSerialState::Checking,
            last_packet: None,
        }));

        let (tx, rx) = mpsc::channel(16);
        profile.start(tx).await?;
        lock(&link).state = BtSerialState::Waiting;
        info!("Bluetooth serial is active");

        let pump = tokio::spawn(pump_events(rx, view, link.clone()));
        Ok(Self {
            profile,
            link,
            pump,
        })
    }

    pub fn state(&self) -> BtSerialState {
        self.state_at(OffsetDateTime::now_utc())
    }

    pub fn state_at(&self, now: OffsetDateTime) -> BtSerialState {
        lock(&self.link).state_at(now)
    }

    pub fn last_packet(&self) -> Option<OffsetDateTime> {
        lock(&self.link).last_packet
    }

    /// Ask the hub to toggle an entity, e.g. `dh` or `ad`
    pub async fn toggle(&mut self, entity: &str) -> bool {
        let command = format!("{}:toggle", entity);
        match self.profile.write(command.as_bytes()).await {
            Ok(()) => {
                info!("Sent {}", command);
                true
            }
            Err(e) => {
                warn!("Failed to send {}: {}", command, e);
                false
            }
        }
    }

    pub async fn stop(mut self) -> Result<P, RadioError> {
        self.pump.abort();
        self.profile.stop().await?;
        lock(&self.link).state = BtSerialState::Inactive;
        Ok(self.profile)
    }
}

async fn pump_events(
    mut rx: mpsc::Receiver<SerialEvent>,
    view: SharedView,
    link: Arc<Mutex<Link>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SerialEvent::Connected => info!("Bluetooth serial peer connected"),
            SerialEvent::Disconnected => {
                info!("Bluetooth serial peer disconnected");
                lock(&link).state = BtSerialState::Waiting;
            }
            SerialEvent::Data(bytes) => {
                debug!(
                    "Serial data received. Size: {}/{}",
                    bytes.len(),
                    TELEMETRY_PACKET_SIZE
                );
                let Some(packet) = TelemetryPacket::from_bytes(&bytes) else {
                    warn!("Dropping serial payload of {} bytes", bytes.len());
                    continue;
                };
                view.lock().await.telemetry = Some(packet);

                let now = OffsetDateTime::now_utc();
                let mut link = lock(&link);
                link.state = BtSerialState::Receiving;
                link.last_packet = Some(now);
                debug!("Telemetry packet at {}", format_datetime(&now));
            }
        }
    }
}

/// L2CAP sequential-packet server advertised under the `HA Rem` prefix
pub struct L2capSerial {
    psm: u16,
    name: String,
    peer: Arc<Mutex<Option<Arc<SeqPacket>>>>,
    advertisement: Option<AdvertisementHandle>,
    accept: Option<JoinHandle<()>>,
    session: Option<Session>,
}

impl L2capSerial {
    pub fn new(psm: u16, name: &str) -> Self {
        Self {
            psm,
            name: format!("{} {}", DEVICE_NAME_PREFIX, name),
            peer: Arc::new(Mutex::new(None)),
            advertisement: None,
            accept: None,
            session: None,
        }
    }

    fn peer(&self) -> Option<Arc<SeqPacket>> {
        match self.peer.lock() {
            Ok(peer) => peer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn set_peer(slot: &Mutex<Option<Arc<SeqPacket>>>, peer: Option<Arc<SeqPacket>>) {
    match slot.lock() {
        Ok(mut current) => *current = peer,
        Err(poisoned) => *poisoned.into_inner() = peer,
    }
}

impl SerialProfile for L2capSerial {
    async fn start(&mut self, events: mpsc::Sender<SerialEvent>) -> Result<(), RadioError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        let local = SocketAddr::new(adapter.address().await?, AddressType::LePublic, self.psm);
        let listener = SeqPacketListener::bind(local).await?;
        info!("Serial link listening on PSM {}", self.psm);

        self.advertisement = Some(
            adapter
                .advertise(Advertisement {
                    advertisement_type: Type::Peripheral,
                    local_name: Some(self.name.clone()),
                    discoverable: Some(true),
                    ..Default::default()
                })
                .await?,
        );

        let peer = self.peer.clone();
        self.accept = Some(tokio::spawn(async move {
            loop {
                let (socket, address) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Serial link accept failed: {}", e);
                        break;
                    }
                };
                info!("Serial link connected to {}", address.addr);
                let socket = Arc::new(socket);
                set_peer(&peer, Some(socket.clone()));
                let _ = events.send(SerialEvent::Connected).await;

                let mut buf = [0u8; SERIAL_BUFFER_SIZE];
                loop {
                    match socket.recv(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if events.send(SerialEvent::Data(buf[..n].to_vec())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("Serial link read failed: {}", e);
                            break;
                        }
                    }
                }

                set_peer(&peer, None);
                let _ = events.send(SerialEvent::Disconnected).await;
            }
        }));
        self.session = Some(session);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), RadioError> {
        let peer = self
            .peer()
            .ok_or_else(|| RadioError::Unavailable("no serial peer connected".to_string()))?;
        peer.send(data).await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RadioError> {
        if let Some(accept) = self.accept.take() {
            accept.abort();
        }
        set_peer(&self.peer, None);
        self.advertisement = None;
        self.session = None;
        info!("Serial link closed");
        Ok(())
    }
}
