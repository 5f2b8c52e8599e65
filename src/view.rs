/// Shared view state and the redraw scheduler
///
/// Workers mutate the state while holding the lock. The scheduler never
/// waits for it: a tick that finds the lock taken is skipped.
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::decoders::SghzCursor;
use crate::models::{SensorSnapshot, TelemetryPacket};

pub const HA_DRAW_PERIOD: Duration = Duration::from_millis(100);
pub const FRAME_DRAW_PERIOD: Duration = Duration::from_millis(10);

/// Everything the render path reads
#[derive(Debug, Default)]
pub struct ViewState {
    pub snapshot: SensorSnapshot,
    /// The snapshot reflects the latest completed response
    pub populated: bool,
    pub page: usize,
    /// Last assembled sub-GHz frame
    pub last_message: String,
    pub cursor: SghzCursor,
    /// Last packet received over the BLE serial link
    pub telemetry: Option<TelemetryPacket>,
}

pub type SharedView = Arc<Mutex<ViewState>>;

pub fn shared(state: ViewState) -> SharedView {
    Arc::new(Mutex::new(state))
}

/// Request for the render path to draw the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redraw;

/// Channel for redraw requests; one slot, so requests cannot pile up
pub fn redraw_channel() -> (mpsc::Sender<Redraw>, mpsc::Receiver<Redraw>) {
    mpsc::channel(1)
}

/// One scheduler tick. Returns true if a redraw was requested.
pub fn on_tick(view: &SharedView, redraw: &mpsc::Sender<Redraw>) -> bool {
    match view.try_lock() {
        Ok(guard) => {
            // Only probing, the render path takes the lock itself
            drop(guard);
            redraw.try_send(Redraw).is_ok()
        }
        Err(_) => {
            debug!("View state busy, skipping redraw");
            false
        }
    }
}

/// Periodic redraw timer, aborted when dropped
pub struct RedrawScheduler {
    handle: JoinHandle<()>,
}

impl RedrawScheduler {
    pub fn start(view: SharedView, period: Duration, redraw: mpsc::Sender<Redraw>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                on_tick(&view, &redraw);
            }
        });
        Self { handle }
    }
}

impl Drop for RedrawScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
