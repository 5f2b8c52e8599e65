/// Sub-GHz receiver behind a USB serial bridge
///
/// The bridge forwards every received packet as raw bytes and accepts a
/// single tuning line, `freq=<hz>`.
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{RadioError, SubGhzDevice};
use crate::models::WorkerMessage;

const BRIDGE_BAUD: u32 = 115_200;
const POLL_PERIOD_MS: u64 = 20;

pub struct SerialSubGhz {
    port: Box<dyn serialport::SerialPort>,
    watching: Arc<AtomicBool>,
}

impl SerialSubGhz {
    pub fn open(path: &str) -> Result<Self, RadioError> {
        let port = serialport::new(path, BRIDGE_BAUD)
            .timeout(Duration::from_millis(POLL_PERIOD_MS))
            .open()?;
        info!("Sub-GHz bridge opened on {}", path);
        Ok(Self {
            port,
            watching: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl SubGhzDevice for SerialSubGhz {
    fn start(
        &mut self,
        frequency: u32,
        notify: mpsc::Sender<WorkerMessage>,
    ) -> Result<(), RadioError> {
        writeln!(self.port, "freq={}", frequency)?;
        self.port.flush()?;

        // Stands in for the hardware "data available" callback
        let probe = self.port.try_clone()?;
        let watching = self.watching.clone();
        watching.store(true, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || {
            while watching.load(Ordering::Relaxed) {
                match probe.bytes_to_read() {
                    Ok(n) if n > 0 => {
                        // A full queue already holds a pending notification
                        let _ = notify.try_send(WorkerMessage::UpdateData);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Sub-GHz bridge unavailable: {}", e);
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(POLL_PERIOD_MS));
            }
            debug!("Sub-GHz bridge watcher stopped");
        });
        Ok(())
    }

    fn available(&mut self) -> bool {
        matches!(self.port.bytes_to_read(), Ok(n) if n > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) -> Result<(), RadioError> {
        self.watching.store(false, Ordering::Relaxed);
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}
