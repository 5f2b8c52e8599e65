/// Home-automation screen over sub-GHz telemetry and a BLE button beacon
use log::{error, info};
use tokio::sync::mpsc;

use super::{
    ha_action, HaAction, ScreenTimers, SessionError, TransportSession, HA_PAGE_COUNT,
};
use crate::bluetooth::beacon::{BeaconConfig, BeaconRadio, BeaconSession, BEACON_DURATION};
use crate::config::{HaSettings, HostSettings};
use crate::decoders::{decode_sghz, SghzCursor, SGHZ_DEFAULT_FRAME};
use crate::input::{InputEvent, InputKey, InputOutcome};
use crate::radio::{ListenStatus, RadioError, RadioListenSession, SubGhzDevice};
use crate::view::{Redraw, SharedView, HA_DRAW_PERIOD};

pub struct SubghzBleSession<R: BeaconRadio, D: SubGhzDevice> {
    beacon: BeaconSession<R>,
    listener: RadioListenSession<D>,
    view: SharedView,
    timers: ScreenTimers,
}

impl<R: BeaconRadio, D: SubGhzDevice> SubghzBleSession<R, D> {
    pub async fn start(
        radio: R,
        device: D,
        settings: &HaSettings,
        host: &HostSettings,
        view: SharedView,
        redraw: mpsc::Sender<Redraw>,
    ) -> Result<Self, RadioError> {
        let beacon = BeaconSession::start(
            radio,
            BeaconConfig::new(settings.randomize_mac),
            &host.beacon_name,
            BEACON_DURATION,
        );

        {
            let mut state = view.lock().await;
            state.last_message = SGHZ_DEFAULT_FRAME.to_string();
            state.cursor = SghzCursor::default();
            state.populated = false;
        }

        let listener = match RadioListenSession::start(device, host.sghz_frequency, view.clone()) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to start sub-GHz receiver: {}", e);
                beacon.stop().await?;
                return Err(e);
            }
        };

        let timers = ScreenTimers::start(view.clone(), HA_DRAW_PERIOD, redraw);
        Ok(Self {
            beacon,
            listener,
            view,
            timers,
        })
    }

    pub fn mac(&self) -> &str {
        self.beacon.mac()
    }
}

impl<R: BeaconRadio, D: SubGhzDevice> TransportSession for SubghzBleSession<R, D> {
    fn name(&self) -> &'static str {
        "Home Assistant (SubGHz/BLE)"
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
            HaAction::Command(press) => {
                self.beacon.press(press).await;
            }
            HaAction::Refresh => {
                self.refresh(true).await;
            }
            _ => {}
        }
        action.outcome()
    }

    async fn refresh(&mut self, force: bool) -> bool {
        let mut guard = self.view.lock().await;
        if force || self.listener.status() == ListenStatus::Inactive {
            let state = &mut *guard;
            decode_sghz(&state.last_message, &mut state.cursor, &mut state.snapshot);
            state.populated = true;
        }
        guard.populated
    }

    fn loading(&self) -> bool {
        self.listener.status() == ListenStatus::Busy
    }

    fn allows_back(&self) -> bool {
        true
    }

    fn last_key(&self) -> Option<InputKey> {
        self.timers.highlight.last()
    }

    async fn stop(self) -> Result<(), SessionError> {
        drop(self.timers);
        self.beacon.stop().await?;
        self.listener.stop().await?;
        info!("SubGHz/BLE session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::beacon::testing::FakeRadio;
    use crate::config::{AppConfig, HA_RANDOMIZE_MAC_KEY};
    use crate::models::{WorkerMessage, NO_DATA};
    use crate::radio::testing::FakeReceiver;
    use crate::view::{redraw_channel, shared, ViewState};
    use std::collections::HashMap;
    use tokio::time::{sleep, Duration};

    fn config() -> AppConfig {
        let map: HashMap<String, String> = [(HA_RANDOMIZE_MAC_KEY.to_string(), "0".to_string())]
            .into_iter()
            .collect();
        AppConfig::from_map(&map).unwrap()
    }

    #[tokio::test]
    async fn received_frame_populates_snapshot() {
        let config = config();
        let view = shared(ViewState::default());
        let (redraw, _rx) = redraw_channel();
        let receiver = FakeReceiver {
            chunks: vec![b"05bt23.4bh40.0kt21.0kh45.0ot10.0oh60.0dhx onadx onco0800pm0004".to_vec()]
                .into(),
            ..Default::default()
        };

        let mut session = SubghzBleSession::start(
            FakeRadio::default(),
            receiver,
            &config.ha,
            &config.host,
            view.clone(),
            redraw,
        )
        .await
        .unwrap();

        // The seeded placeholder never decodes
        assert!(!session.loading());
        assert_eq!(view.lock().await.last_message, SGHZ_DEFAULT_FRAME);

        session
            .listener
            .sender()
            .send(WorkerMessage::UpdateData)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(session.refresh(false).await);
        let snapshot = view.lock().await.snapshot.clone();
        assert_eq!(snapshot.bedroom_temp, "23.4");
        assert_eq!(snapshot.dehum_status, "on-A");
        assert_eq!(snapshot.co2, "0800");

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn down_on_dehumidifier_page_fires_beacon() {
        let config = config();
        let view = shared(ViewState::default());
        let (redraw, _rx) = redraw_channel();
        let radio = FakeRadio::default();

        let mut session = SubghzBleSession::start(
            radio.clone(),
            FakeReceiver::default(),
            &config.ha,
            &config.host,
            view.clone(),
            redraw,
        )
        .await
        .unwrap();

        session.on_input(InputEvent::short(InputKey::Right)).await;
        session.on_input(InputEvent::long(InputKey::Down)).await;
        sleep(Duration::from_millis(10)).await;
        assert!(radio.state().active);
        assert_eq!(view.lock().await.snapshot.bedroom_temp, NO_DATA);

        session.stop().await.unwrap();
        assert!(!radio.state().active);
    }
}
