/// Home-automation screen over the BLE serial link
use log::info;
use tokio::sync::mpsc;

use super::{
    ha_action, HaAction, ScreenTimers, SessionError, TransportSession, HA_PAGE_COUNT,
};
use crate::bluetooth::serial::{BleSerialSession, BtSerialState, SerialProfile};
use crate::decoders::{decode_packet, DEHUM_AUTOMATION_KEY, DEHUM_KEY};
use crate::input::{InputEvent, InputKey, InputOutcome};
use crate::models::PressType;
use crate::radio::RadioError;
use crate::utils::format_datetime;
use crate::view::{Redraw, SharedView, HA_DRAW_PERIOD};

pub struct BtSerialSession<P: SerialProfile> {
    link: BleSerialSession<P>,
    view: SharedView,
    timers: ScreenTimers,
}

impl<P: SerialProfile> BtSerialSession<P> {
    pub async fn start(
        profile: P,
        view: SharedView,
        redraw: mpsc::Sender<Redraw>,
    ) -> Result<Self, RadioError> {
        {
            let mut state = view.lock().await;
            state.telemetry = None;
            state.populated = false;
        }
        let link = BleSerialSession::start(profile, view.clone()).await?;
        let timers = ScreenTimers::start(view.clone(), HA_DRAW_PERIOD, redraw);
        Ok(Self { link, view, timers })
    }

    pub fn link_state(&self) -> BtSerialState {
        self.link.state()
    }
}

impl<P: SerialProfile> TransportSession for BtSerialSession<P> {
    fn name(&self) -> &'static str {
        "Home Assistant (BT Serial)"
    }

    fn page_count(&self) -> usize {
        HA_PAGE_COUNT
    }

    async fn on_input(&mut self, event: InputEvent) -> InputOutcome {
        self.timers
            .highlight
            .press(event.key, event.key == InputKey::Down);

        let action = ha_action(&mut self.view.lock().await.page, event);
        match action {
            HaAction::Command(PressType::Short) => {
                self.link.toggle(DEHUM_KEY).await;
            }
            HaAction::Command(PressType::Long) => {
                self.link.toggle(DEHUM_AUTOMATION_KEY).await;
            }
            HaAction::Refresh => {
                self.refresh(true).await;
            }
            _ => {}
        }
        action.outcome()
    }

    /// Every redraw decodes the last received packet
    async fn refresh(&mut self, _force: bool) -> bool {
        let mut guard = self.view.lock().await;
        let state = &mut *guard;
        if let Some(packet) = &state.telemetry {
            decode_packet(packet, &mut state.snapshot);
            state.populated = true;
        }
        state.populated
    }

    fn loading(&self) -> bool {
        false
    }

    fn allows_back(&self) -> bool {
        true
    }

    fn last_key(&self) -> Option<InputKey> {
        self.timers.highlight.last()
    }

    fn exit_text(&self) -> Option<String> {
        self.link
            .last_packet()
            .map(|at| format!("Last packet at {}", format_datetime(&at)))
    }

    async fn stop(self) -> Result<(), SessionError> {
        drop(self.timers);
        self.link.stop().await?;
        info!("BT serial session closed");
        Ok(())
    }
}
