/// Sub-GHz receive session
pub mod serial;

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::WorkerMessage;
use crate::view::SharedView;

/// Size of the worker's private read buffer
pub const MESSAGE_BUFFER_SIZE: usize = 64;

/// Failures of the radio and Bluetooth backends
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("advertising packet too big: max {max}, size {size}")]
    PacketTooLarge { max: usize, size: usize },
    #[error("radio worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Unavailable(String),
}

/// Receiver hardware seam
pub trait SubGhzDevice: Send + 'static {
    /// Tune to `frequency` and start notifying `notify` with `UpdateData`
    /// whenever received bytes are pending. Notifications must not block.
    fn start(&mut self, frequency: u32, notify: mpsc::Sender<WorkerMessage>)
        -> Result<(), RadioError>;
    /// Whether received bytes are waiting
    fn available(&mut self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RadioError>;
    /// Stop notifications and put the receiver to sleep
    fn shutdown(&mut self) -> Result<(), RadioError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenStatus {
    Init,
    Busy,
    Inactive,
}

impl ListenStatus {
    fn load(cell: &AtomicU8) -> Self {
        match cell.load(Ordering::Acquire) {
            0 => Self::Init,
            1 => Self::Busy,
            _ => Self::Inactive,
        }
    }

    fn store(self, cell: &AtomicU8) {
        cell.store(self as u8, Ordering::Release);
    }
}

/// Running receive worker; `stop` hands the device back asleep
pub struct RadioListenSession<D: SubGhzDevice> {
    tx: mpsc::Sender<WorkerMessage>,
    status: Arc<AtomicU8>,
    worker: JoinHandle<D>,
}

impl<D: SubGhzDevice> RadioListenSession<D> {
    pub fn start(mut device: D, frequency: u32, view: SharedView) -> Result<Self, RadioError> {
        let (tx, rx) = mpsc::channel(8);
        device.start(frequency, tx.clone())?;
        info!("Listening at frequency: {}", frequency);

        let status = Arc::new(AtomicU8::new(ListenStatus::Init as u8));
        let worker = tokio::spawn(listen(device, rx, view, status.clone()));
        Ok(Self { tx, status, worker })
    }

    pub fn status(&self) -> ListenStatus {
        ListenStatus::load(&self.status)
    }

    pub fn sender(&self) -> mpsc::Sender<WorkerMessage> {
        self.tx.clone()
    }

    pub async fn stop(self) -> Result<D, RadioError> {
        let _ = self.tx.send(WorkerMessage::Stop).await;
        let mut device = self.worker.await?;
        device.shutdown()?;
        info!("Sub-GHz receiver stopped");
        Ok(device)
    }
}

async fn listen<D: SubGhzDevice>(
    mut device: D,
    mut rx: mpsc::Receiver<WorkerMessage>,
    view: SharedView,
    status: Arc<AtomicU8>,
) -> D {
    info!("Sub-GHz listener started");
    let mut message = [0u8; MESSAGE_BUFFER_SIZE];
    let mut output = String::new();

    while let Some(event) = rx.recv().await {
        match event {
            WorkerMessage::UpdateData => {
                let mut drained = false;
                while device.available() {
                    drained = true;
                    ListenStatus::Busy.store(&status);
                    match device.read(&mut message) {
                        Ok(0) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&message[..n]);
                            info!("[Message] {}", chunk);
                            output.push_str(&chunk);
                        }
                        Err(e) => {
                            warn!("Sub-GHz read failed: {}", e);
                            break;
                        }
                    }
                }

                if output.is_empty() {
                    if drained {
                        ListenStatus::Inactive.store(&status);
                    }
                    continue;
                }
                match view.try_lock() {
                    Ok(mut state) => {
                        state.last_message = std::mem::take(&mut output);
                        ListenStatus::Inactive.store(&status);
                    }
                    Err(_) => debug!("View state busy, dropping sub-GHz frame"),
                }
                output.clear();
            }
            WorkerMessage::Stop => break,
            other => debug!("Sub-GHz listener ignoring {:?}", other),
        }
    }

    ListenStatus::Inactive.store(&status);
    info!("Sub-GHz listener stopping...");
    device
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Receiver fed from a queue of chunks
    #[derive(Default)]
    pub struct FakeReceiver {
        pub chunks: VecDeque<Vec<u8>>,
        pub frequency: Option<u32>,
        pub asleep: bool,
        pub notify: Option<mpsc::Sender<WorkerMessage>>,
        /// Every read fails
        pub broken: bool,
    }

    impl SubGhzDevice for FakeReceiver {
        fn start(
            &mut self,
            frequency: u32,
            notify: mpsc::Sender<WorkerMessage>,
        ) -> Result<(), RadioError> {
            self.frequency = Some(frequency);
            self.notify = Some(notify);
            Ok(())
        }

        fn available(&mut self) -> bool {
            !self.chunks.is_empty()
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
            if self.broken {
                return Err(RadioError::Unavailable("receiver unplugged".to_string()));
            }
            let chunk = self.chunks.pop_front().unwrap_or_default();
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }

        fn shutdown(&mut self) -> Result<(), RadioError> {
            self.notify = None;
            self.asleep = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeReceiver;
    use super::*;
    use crate::config::DEFAULT_SGHZ_FREQUENCY as DEFAULT_FREQUENCY;
    use crate::view::{shared, ViewState};
    use tokio::time::{sleep, Duration};

    fn receiver(chunks: &[&str]) -> FakeReceiver {
        FakeReceiver {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            ..Default::default()
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn drained_chunks_are_swapped_into_view() {
        let view = shared(ViewState::default());
        let session = RadioListenSession::start(
            receiver(&["01bt21.5bh45.0kt22.1", "kh51.3ot-2.1oh88.0"]),
            DEFAULT_FREQUENCY,
            view.clone(),
        )
        .unwrap();
        assert_eq!(session.status(), ListenStatus::Init);

        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;

        assert_eq!(session.status(), ListenStatus::Inactive);
        assert_eq!(
            view.lock().await.last_message,
            "01bt21.5bh45.0kt22.1kh51.3ot-2.1oh88.0"
        );

        let device = session.stop().await.unwrap();
        assert!(device.asleep);
        assert_eq!(device.frequency, Some(DEFAULT_FREQUENCY));
    }

    #[tokio::test]
    async fn busy_view_drops_the_frame() {
        let view = shared(ViewState::default());
        let session =
            RadioListenSession::start(receiver(&["02bt19.0"]), DEFAULT_FREQUENCY, view.clone())
                .unwrap();

        let guard = view.lock().await;
        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;
        assert_eq!(session.status(), ListenStatus::Busy);
        drop(guard);

        assert_eq!(view.lock().await.last_message, "");
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_marks_inactive() {
        let view = shared(ViewState::default());
        let session = RadioListenSession::start(receiver(&[]), DEFAULT_FREQUENCY, view).unwrap();
        let status = session.status.clone();
        session.stop().await.unwrap();
        assert_eq!(ListenStatus::load(&status), ListenStatus::Inactive);
    }

    #[tokio::test]
    async fn failed_read_leaves_view_alone() {
        let view = shared(ViewState::default());
        view.lock().await.last_message = "07bt20.0".to_string();
        let device = FakeReceiver {
            broken: true,
            ..receiver(&["08bt21.0"])
        };
        let session = RadioListenSession::start(device, DEFAULT_FREQUENCY, view.clone()).unwrap();

        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;
        assert_eq!(session.status(), ListenStatus::Inactive);
        assert_eq!(view.lock().await.last_message, "07bt20.0");

        // The listener keeps serving notifications after a failure
        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;
        assert_eq!(session.status(), ListenStatus::Inactive);
        let device = session.stop().await.unwrap();
        assert!(device.asleep);
    }

    #[tokio::test]
    async fn empty_drain_does_not_stay_busy() {
        let view = shared(ViewState::default());
        let session =
            RadioListenSession::start(receiver(&[""]), DEFAULT_FREQUENCY, view.clone()).unwrap();

        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;
        assert_eq!(session.status(), ListenStatus::Inactive);
        assert_eq!(view.lock().await.last_message, "");
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn notification_without_data_keeps_init() {
        let view = shared(ViewState::default());
        let session = RadioListenSession::start(receiver(&[]), DEFAULT_FREQUENCY, view).unwrap();

        session.sender().send(WorkerMessage::UpdateData).await.unwrap();
        settle().await;
        assert_eq!(session.status(), ListenStatus::Init);
        session.stop().await.unwrap();
    }
}
