/// Screen sessions, one per transport
///
/// A session owns its worker task and timers from `start` to `stop`.
/// Teardown always stops the timers before the worker.
pub mod bt_serial;
pub mod frame;
pub mod subghz_ble;
pub mod wifi;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::input::{next_page, previous_page, InputEvent, InputKey, InputOutcome, KeyHighlight};
use crate::models::{PressType, WorkerMessage};
use crate::radio::RadioError;
use crate::view::{Redraw, RedrawScheduler, SharedView};

pub use bt_serial::BtSerialSession;
pub use frame::{FrameCommand, FrameSession, FrameStatus};
pub use subghz_ble::SubghzBleSession;
pub use wifi::WifiSession;

pub const HA_PAGE_COUNT: usize = 3;
/// Page holding the dehumidifier control
pub const DEHUM_PAGE: usize = 1;

/// Failures while tearing a session down
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error("session worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Active transport behind a screen
#[allow(async_fn_in_trait)]
pub trait TransportSession {
    fn name(&self) -> &'static str;

    fn page_count(&self) -> usize {
        1
    }

    async fn on_input(&mut self, event: InputEvent) -> InputOutcome;

    /// Re-decode the snapshot when the session's populate gate is open, or
    /// unconditionally with `force`. Returns whether the snapshot is populated.
    async fn refresh(&mut self, force: bool) -> bool;

    fn loading(&self) -> bool;

    fn allows_back(&self) -> bool;

    fn last_key(&self) -> Option<InputKey>;

    /// Text for the response viewer shown after leaving the screen
    fn exit_text(&self) -> Option<String> {
        None
    }

    async fn stop(self) -> Result<(), SessionError>;
}

/// Redraw timer plus key highlight of one screen
pub struct ScreenTimers {
    _redraw: RedrawScheduler,
    pub highlight: KeyHighlight,
}

impl ScreenTimers {
    pub fn start(view: SharedView, period: Duration, redraw: mpsc::Sender<Redraw>) -> Self {
        Self {
            _redraw: RedrawScheduler::start(view, period, redraw),
            highlight: KeyHighlight::new(),
        }
    }
}

/// Periodically post `message` to a worker, first after one period.
/// A full queue skips the tick.
pub fn spawn_ticker(
    tx: mpsc::Sender<WorkerMessage>,
    period: Duration,
    message: WorkerMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(TrySendError::Closed(_)) = tx.try_send(message) {
                break;
            }
        }
    })
}

/// Home-automation screen action, common to every transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaAction {
    Ignored,
    Redraw,
    Refresh,
    Back,
    Command(PressType),
}

pub fn ha_action(page: &mut usize, event: InputEvent) -> HaAction {
    match (event.press, event.key) {
        (PressType::Short, InputKey::Left) => {
            *page = previous_page(*page);
            HaAction::Redraw
        }
        (PressType::Short, InputKey::Right) => {
            *page = next_page(*page, HA_PAGE_COUNT);
            HaAction::Redraw
        }
        (press, InputKey::Down) if *page == DEHUM_PAGE => HaAction::Command(press),
        (_, InputKey::Down) => HaAction::Redraw,
        (_, InputKey::Back) => HaAction::Back,
        (PressType::Short, InputKey::Ok) => HaAction::Refresh,
        _ => HaAction::Ignored,
    }
}

impl HaAction {
    /// Outcome for actions that need nothing from the transport
    pub fn outcome(self) -> InputOutcome {
        match self {
            HaAction::Ignored => InputOutcome::Ignored,
            HaAction::Back => InputOutcome::CheckBack,
            _ => InputOutcome::Redraw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn teardown_errors_keep_their_source() {
        let radio = SessionError::from(RadioError::Unavailable("no serial peer".to_string()));
        assert_eq!(radio.to_string(), "no serial peer");

        let panicked = tokio::spawn(async { panic!("worker died") }).await.unwrap_err();
        let worker = SessionError::from(panicked);
        assert!(matches!(worker, SessionError::Worker(_)));
        assert!(worker.to_string().starts_with("session worker failed"));
    }

    #[test]
    fn down_only_commands_on_dehumidifier_page() {
        let mut page = 0;
        assert_eq!(
            ha_action(&mut page, InputEvent::short(InputKey::Down)),
            HaAction::Redraw
        );

        assert_eq!(
            ha_action(&mut page, InputEvent::short(InputKey::Right)),
            HaAction::Redraw
        );
        assert_eq!(page, DEHUM_PAGE);
        assert_eq!(
            ha_action(&mut page, InputEvent::short(InputKey::Down)),
            HaAction::Command(PressType::Short)
        );
        assert_eq!(
            ha_action(&mut page, InputEvent::long(InputKey::Down)),
            HaAction::Command(PressType::Long)
        );
    }

    #[test]
    fn page_navigation_is_clamped() {
        let mut page = 0;
        ha_action(&mut page, InputEvent::short(InputKey::Left));
        assert_eq!(page, 0);
        for _ in 0..5 {
            ha_action(&mut page, InputEvent::short(InputKey::Right));
        }
        assert_eq!(page, HA_PAGE_COUNT - 1);
    }

    #[test]
    fn back_and_ok() {
        let mut page = 0;
        assert_eq!(
            ha_action(&mut page, InputEvent::long(InputKey::Back)).outcome(),
            InputOutcome::CheckBack
        );
        assert_eq!(
            ha_action(&mut page, InputEvent::short(InputKey::Ok)),
            HaAction::Refresh
        );
        assert_eq!(
            ha_action(&mut page, InputEvent::long(InputKey::Ok)),
            HaAction::Ignored
        );
        assert_eq!(
            ha_action(&mut page, InputEvent::short(InputKey::Up)).outcome(),
            InputOutcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_posts_after_each_period() {
        let (tx, mut rx) = mpsc::channel(4);
        let ticker = spawn_ticker(tx, Duration::from_millis(500), WorkerMessage::UpdateData);

        assert!(rx.try_recv().is_err());
        assert_eq!(rx.recv().await, Some(WorkerMessage::UpdateData));
        assert_eq!(rx.recv().await, Some(WorkerMessage::UpdateData));
        ticker.abort();
    }
}
