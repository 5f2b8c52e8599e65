/// Home-automation screen over the Wi-Fi co-processor
///
/// A worker task polls the sensors endpoint on every tick and posts toggle
/// commands on request. Toggles wait, without limit, until the co-processor
/// accepts a new request; only Stop ends the wait.
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    ha_action, spawn_ticker, HaAction, ScreenTimers, SessionError, TransportSession,
    HA_PAGE_COUNT,
};
use crate::config::HaSettings;
use crate::decoders::decode_json;
use crate::input::{InputEvent, InputKey, InputOutcome};
use crate::models::WorkerMessage;
use crate::transport::TransportClient;
use crate::utils::format_response;
use crate::view::{Redraw, SharedView, HA_DRAW_PERIOD};

pub const HA_HEADER: &str = r#"{"Content-Type": "application/json"}"#;
pub const DEHUM_ENTITY: &str = "switch.dehumidifier";

pub fn sensors_payload(token: &str) -> String {
    json!({ "token": token }).to_string()
}

pub fn command_payload(token: &str, entity: &str) -> String {
    json!({ "token": token, "entity": entity }).to_string()
}

struct Requests {
    sensors_url: String,
    sensors_payload: String,
    command_url: String,
    command_payload: String,
}

pub struct WifiSession<C: TransportClient + 'static> {
    client: Arc<C>,
    view: SharedView,
    tx: mpsc::Sender<WorkerMessage>,
    worker: JoinHandle<()>,
    poll: JoinHandle<()>,
    timers: ScreenTimers,
    request_sent: Arc<AtomicBool>,
}

impl<C: TransportClient + 'static> WifiSession<C> {
    pub async fn start(
        client: Arc<C>,
        settings: &HaSettings,
        view: SharedView,
        redraw: mpsc::Sender<Redraw>,
    ) -> Self {
        let wifi = &settings.sensors;
        if client.save_credentials(&wifi.ssid, &wifi.password) {
            info!("Attempting connection to ssid: {}", wifi.ssid);
        } else {
            error!("Failed to connect to Home Assistant WiFi");
        }

        let requests = Requests {
            sensors_url: wifi.url.clone(),
            sensors_payload: sensors_payload(&settings.token),
            command_url: settings.command_url.clone(),
            command_payload: command_payload(&settings.token, DEHUM_ENTITY),
        };

        view.lock().await.populated = false;

        let (tx, rx) = mpsc::channel(8);
        let request_sent = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(command_worker(
            client.clone(),
            rx,
            requests,
            view.clone(),
            request_sent.clone(),
        ));

        // Update once on enter, then on every polling tick
        let _ = tx.try_send(WorkerMessage::UpdateData);
        let poll = spawn_ticker(tx.clone(), settings.polling.period(), WorkerMessage::UpdateData);
        info!(
            "Comm. worker started with period [{}]ms",
            settings.polling.period().as_millis()
        );

        let timers = ScreenTimers::start(view.clone(), HA_DRAW_PERIOD, redraw);
        Self {
            client,
            view,
            tx,
            worker,
            poll,
            timers,
            request_sent,
        }
    }

    /// Whether the worker may issue a request right now
    pub fn allows_command(&self) -> bool {
        self.client
            .status()
            .allows_command(self.request_sent.load(Ordering::Acquire))
    }
}

impl<C: TransportClient + 'static> TransportSession for WifiSession<C> {
    fn name(&self) -> &'static str {
        "Home Assistant (Wi-Fi)"
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
                if self.tx.send(WorkerMessage::SendCommand(press)).await.is_err() {
                    warn!("Comm. worker is gone, command dropped");
                }
            }
            HaAction::Refresh => {
                self.refresh(true).await;
            }
            _ => {}
        }
        action.outcome()
    }

    async fn refresh(&mut self, force: bool) -> bool {
        let status = self.client.status();
        let mut guard = self.view.lock().await;
        let state = &mut *guard;
        if force || (status.response_ready() && !state.populated) {
            debug!("Parsing json");
            state.populated = decode_json(&self.client.last_response(), &mut state.snapshot);
        }
        state.populated
    }

    fn loading(&self) -> bool {
        self.client.status().is_loading()
    }

    /// Leaving is always allowed on this screen, even mid-request
    fn allows_back(&self) -> bool {
        true
    }

    fn last_key(&self) -> Option<InputKey> {
        self.timers.highlight.last()
    }

    fn exit_text(&self) -> Option<String> {
        Some(format_response(&self.client.last_response()))
    }

    async fn stop(self) -> Result<(), SessionError> {
        self.poll.abort();
        drop(self.timers);

        let _ = self.tx.send(WorkerMessage::Stop).await;
        self.worker.await?;
        info!("Comm. worker stopped");
        Ok(())
    }
}

/// Park until the adapter accepts a new request. Messages other than Stop
/// that arrive meanwhile are queued once each. Returns false on Stop.
async fn wait_for_slot<C: TransportClient>(
    client: &C,
    request_sent: &AtomicBool,
    rx: &mut mpsc::Receiver<WorkerMessage>,
    pending: &mut VecDeque<WorkerMessage>,
) -> bool {
    let mut status = client.subscribe();
    loop {
        if status
            .borrow_and_update()
            .allows_command(request_sent.load(Ordering::Acquire))
        {
            return true;
        }
        info!("Co-processor busy, waiting...");

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("Co-processor status closed while waiting");
                    return false;
                }
            }
            message = rx.recv() => match message {
                Some(WorkerMessage::Stop) | None => return false,
                Some(other) => {
                    if !pending.contains(&other) {
                        pending.push_back(other);
                    }
                }
            }
        }
    }
}

async fn command_worker<C: TransportClient>(
    client: Arc<C>,
    mut rx: mpsc::Receiver<WorkerMessage>,
    requests: Requests,
    view: SharedView,
    request_sent: Arc<AtomicBool>,
) {
    let mut pending = VecDeque::new();

    loop {
        let message = match pending.pop_front() {
            Some(message) => message,
            None => match rx.recv().await {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            WorkerMessage::Stop => {
                info!("Worker event: stop command request");
                break;
            }
            WorkerMessage::SendCommand(_) => {
                info!("Worker event: send command");
                if !wait_for_slot(&*client, &request_sent, &mut rx, &mut pending).await {
                    info!("Worker event: stopped while waiting");
                    break;
                }
                let sent = client.post_with_headers(
                    &requests.command_url,
                    HA_HEADER,
                    &requests.command_payload,
                );
                request_sent.store(sent, Ordering::Release);
                if sent {
                    info!("Worker event: command sent");
                } else {
                    error!("Worker event: command send failed");
                }
            }
            WorkerMessage::UpdateData => {
                if !client
                    .status()
                    .allows_command(request_sent.load(Ordering::Acquire))
                {
                    debug!("Worker event: update skipped, request in flight");
                    continue;
                }
                info!("Worker event: sending update request...");
                let sent = client.post_with_headers(
                    &requests.sensors_url,
                    HA_HEADER,
                    &requests.sensors_payload,
                );
                request_sent.store(sent, Ordering::Release);
                if sent {
                    info!("Worker event: update request sent");
                    view.lock().await.populated = false;
                } else {
                    error!("Worker event: update request failed");
                }
            }
            WorkerMessage::StopBeacon => {}
        }
    }
    info!("Worker event: stopping...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlMode, PollingInterval, WifiTarget};
    use crate::transport::testing::{FakeClient, Request};
    use crate::transport::{AdapterState, RequestLifecycle};
    use crate::view::{redraw_channel, shared, ViewState};
    use tokio::time::{sleep, Duration};

    const SENSORS_URL: &str = "http://ha.local/api/sensors";
    const COMMAND_URL: &str = "http://ha.local/api/toggle";

    fn settings() -> HaSettings {
        HaSettings {
            sensors: WifiTarget {
                url: SENSORS_URL.to_string(),
                ssid: "home".to_string(),
                password: "pw".to_string(),
            },
            command_url: COMMAND_URL.to_string(),
            polling: PollingInterval::S10,
            control_mode: ControlMode::WifiHttp,
            randomize_mac: false,
            token: "abc".to_string(),
        }
    }

    async fn start(client: Arc<FakeClient>) -> (WifiSession<FakeClient>, SharedView) {
        let view = shared(ViewState::default());
        let (redraw, _rx) = redraw_channel();
        let session = WifiSession::start(client, &settings(), view.clone(), redraw).await;
        (session, view)
    }

    fn posts_to(client: &FakeClient, url: &str) -> usize {
        client
            .requests()
            .iter()
            .filter(|r| matches!(r, Request::Post { url: u, .. } if u == url))
            .count()
    }

    #[test]
    fn payloads_are_json() {
        assert_eq!(sensors_payload("abc"), r#"{"token":"abc"}"#);
        let command: serde_json::Value =
            serde_json::from_str(&command_payload("abc", DEHUM_ENTITY)).unwrap();
        assert_eq!(command["entity"], "switch.dehumidifier");
        assert_eq!(command["token"], "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn enter_saves_credentials_and_updates_once() {
        let client = Arc::new(FakeClient::idle());
        let (session, _view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;

        let requests = client.requests();
        assert_eq!(requests[0], Request::Credentials("home".into(), "pw".into()));
        assert_eq!(
            requests[1],
            Request::Post {
                url: SENSORS_URL.to_string(),
                headers: HA_HEADER.to_string(),
                body: r#"{"token":"abc"}"#.to_string(),
            }
        );
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_skipped_while_request_in_flight() {
        let client = Arc::new(FakeClient::idle());
        let (session, _view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 1);

        // Busy after the first post; the next tick must not post again
        sleep(PollingInterval::S10.period()).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 1);

        client.complete(r#"{"bt":"21.0"}"#);
        sleep(PollingInterval::S10.period()).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 2);
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn command_waits_for_adapter_then_posts() {
        let client = Arc::new(FakeClient::idle());
        let (mut session, view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;

        view.lock().await.page = 1;
        let outcome = session.on_input(InputEvent::short(InputKey::Down)).await;
        assert_eq!(outcome, InputOutcome::Redraw);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(posts_to(&client, COMMAND_URL), 0);

        client.set_status(AdapterState::Idle, RequestLifecycle::Done);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(posts_to(&client, COMMAND_URL), 1);
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_an_unbounded_wait() {
        let client = Arc::new(FakeClient::idle());
        let (session, _view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;

        session.tx.send(WorkerMessage::SendCommand(crate::models::PressType::Long)).await.unwrap();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(posts_to(&client, COMMAND_URL), 0);

        session.stop().await.unwrap();
        assert_eq!(posts_to(&client, COMMAND_URL), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn populate_gate_decodes_once_per_response() {
        let client = Arc::new(FakeClient::idle());
        let (mut session, view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;

        assert!(!session.refresh(false).await);
        assert!(session.loading());

        client.complete(r#"{"bt":"21.0","co":"500"}"#);
        assert!(session.refresh(false).await);
        assert_eq!(view.lock().await.snapshot.bedroom_temp, "21.0");

        // Later edits to the snapshot are not overwritten until forced
        view.lock().await.snapshot.bedroom_temp = "x".to_string();
        assert!(session.refresh(false).await);
        assert_eq!(view.lock().await.snapshot.bedroom_temp, "x");
        assert_eq!(
            session.on_input(InputEvent::short(InputKey::Ok)).await,
            InputOutcome::Redraw
        );
        assert_eq!(view.lock().await.snapshot.bedroom_temp, "21.0");

        assert!(session.exit_text().unwrap().contains("bt:21.0"));
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_update_waits_for_next_tick() {
        let client = Arc::new(FakeClient::idle());
        client.fail_posts.store(true, std::sync::atomic::Ordering::Relaxed);
        let (session, view) = start(client.clone()).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 1);

        {
            let mut state = view.lock().await;
            state.populated = true;
            state.snapshot.co2 = "480".to_string();
        }

        // No retry before the next tick
        sleep(Duration::from_secs(5)).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 1);

        sleep(PollingInterval::S10.period()).await;
        assert_eq!(posts_to(&client, SENSORS_URL), 2);
        {
            let state = view.lock().await;
            assert!(state.populated);
            assert_eq!(state.snapshot.co2, "480");
        }
        assert!(!session.request_sent.load(Ordering::Acquire));
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn back_is_always_allowed() {
        let client = Arc::new(FakeClient::new(crate::transport::AdapterStatus {
            state: AdapterState::Receiving,
            lifecycle: RequestLifecycle::Busy,
        }));
        let (mut session, _view) = start(client).await;
        assert_eq!(
            session.on_input(InputEvent::short(InputKey::Back)).await,
            InputOutcome::CheckBack
        );
        assert!(session.allows_back());
        session.stop().await.unwrap();
    }
}
