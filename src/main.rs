mod bluetooth;
mod config;
mod decoders;
mod input;
mod models;
mod radio;
mod session;
mod transport;
mod utils;
mod view;

use log::{debug, error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use bluetooth::{BluerAdvertiser, L2capSerial};
use config::{AppConfig, ControlMode};
use input::{parse_key, InputEvent, InputKey, InputOutcome};
use radio::serial::SerialSubGhz;
use session::{BtSerialSession, FrameSession, SubghzBleSession, TransportSession, WifiSession};
use transport::uart::UartClient;
use transport::wait_until_ready;
use utils::format_datetime;
use view::{redraw_channel, shared, Redraw, SharedView, ViewState};

const PING_PERIOD: Duration = Duration::from_millis(100);

/// Screen selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Frame,
    Home,
}

impl Screen {
    fn from_arg(arg: Option<&str>) -> Option<Self> {
        match arg {
            None | Some("ha") => Some(Screen::Home),
            Some("frame") => Some(Screen::Frame),
            _ => None,
        }
    }
}

/// What the console render last showed, to log only changes
#[derive(Debug, Default, PartialEq)]
struct Rendered {
    page: usize,
    snapshot: Option<String>,
    loading: bool,
    last_key: Option<InputKey>,
}

async fn render<S: TransportSession>(session: &mut S, view: &SharedView, last: &mut Rendered) {
    let populated = session.refresh(false).await;
    let state = view.lock().await;
    let current = Rendered {
        page: state.page,
        snapshot: populated.then(|| state.snapshot.to_string()),
        loading: session.loading(),
        last_key: session.last_key(),
    };
    drop(state);

    if current == *last {
        return;
    }
    if current.snapshot != last.snapshot || current.page != last.page {
        info!(
            "[{} {}/{}] {}",
            session.name(),
            current.page + 1,
            session.page_count(),
            current.snapshot.as_deref().unwrap_or("waiting for data")
        );
    }
    if current.loading != last.loading {
        debug!("Loading: {}", current.loading);
    }
    if let Some(key) = current.last_key {
        debug!("Key {:?}", key);
    }
    *last = current;
}

/// Drive one screen until the user leaves it, then tear the session down
async fn run_screen<S: TransportSession>(
    mut session: S,
    view: SharedView,
    mut redraw: mpsc::Receiver<Redraw>,
    input: &mut mpsc::Receiver<InputEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Entering {}", session.name());
    let mut rendered = Rendered::default();

    loop {
        tokio::select! {
            Some(Redraw) = redraw.recv() => {
                render(&mut session, &view, &mut rendered).await;
            }
            event = input.recv() => {
                let event = match event {
                    Some(event) => event,
                    None => break,
                };
                match session.on_input(event).await {
                    InputOutcome::CheckBack if session.allows_back() => break,
                    InputOutcome::CheckBack => warn!("Request in flight, Back ignored"),
                    InputOutcome::ForceBack => break,
                    InputOutcome::Redraw | InputOutcome::Handled => {
                        render(&mut session, &view, &mut rendered).await;
                    }
                    InputOutcome::Ignored => {}
                }
            }
        }
    }

    if let Some(text) = session.exit_text() {
        info!("Last response:\n{}", text);
    }
    session.stop().await?;
    info!("Left screen at {}", format_datetime(&OffsetDateTime::now_utc()));
    Ok(())
}

fn open_uart(config: &AppConfig) -> Result<Arc<UartClient>, Box<dyn std::error::Error>> {
    let client = UartClient::open(&config.host.uart_port, config.host.uart_baud)?;
    Ok(Arc::new(client))
}

/// Resolves on a Back press or once the input side is gone
async fn back_pressed(input: &mut mpsc::Receiver<InputEvent>) {
    while let Some(event) = input.recv().await {
        if event.key == InputKey::Back {
            return;
        }
        debug!("Co-processor not ready, ignoring {:?}", event.key);
    }
}

async fn run(
    screen: Screen,
    config: AppConfig,
    input: &mut mpsc::Receiver<InputEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let view = shared(ViewState::default());
    let (redraw_tx, redraw_rx) = redraw_channel();

    match (screen, config.ha.control_mode) {
        (Screen::Frame, _) => {
            let client = open_uart(&config)?;
            if !wait_until_ready(client.as_ref(), PING_PERIOD, back_pressed(input)).await {
                return Ok(());
            }
            let session = FrameSession::start(client, &config.frame, view.clone(), redraw_tx);
            run_screen(session, view, redraw_rx, input).await
        }
        (Screen::Home, ControlMode::WifiHttp) => {
            let client = open_uart(&config)?;
            if !wait_until_ready(client.as_ref(), PING_PERIOD, back_pressed(input)).await {
                return Ok(());
            }
            let session = WifiSession::start(client, &config.ha, view.clone(), redraw_tx).await;
            run_screen(session, view, redraw_rx, input).await
        }
        (Screen::Home, ControlMode::SubghzBleHome) => {
            let radio = BluerAdvertiser::new().await?;
            let device = SerialSubGhz::open(&config.host.sghz_port)?;
            let session = SubghzBleSession::start(
                radio,
                device,
                &config.ha,
                &config.host,
                view.clone(),
                redraw_tx,
            )
            .await?;
            info!("Beacon address {}", session.mac());
            run_screen(session, view, redraw_rx, input).await
        }
        (Screen::Home, ControlMode::BleSerial) => {
            let profile = L2capSerial::new(config.host.ble_psm, &config.host.beacon_name);
            let session = BtSerialSession::start(profile, view.clone(), redraw_tx).await?;
            info!("Serial link {:?}", session.link_state());
            run_screen(session, view, redraw_rx, input).await
        }
    }
}

/// Forward console keys to the screen
fn spawn_console(tx: mpsc::Sender<InputEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_key(&line) {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown key {:?}, use w/a/s/d/o/b (upper case: long)", line),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Console read failed: {}", e);
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let arg = std::env::args().nth(1);
    let screen = match Screen::from_arg(arg.as_deref()) {
        Some(screen) => screen,
        None => {
            error!("Usage: home-remote [ha|frame]");
            return Err("unknown screen".into());
        }
    };

    // Load configuration
    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    debug!("Loaded {} settings", config.to_map().len());
    info!(
        "Starting {:?} screen, control mode {}, polling {}",
        screen,
        config.ha.control_mode.name(),
        config.ha.polling.name()
    );

    let (input_tx, mut input_rx) = mpsc::channel(8);
    spawn_console(input_tx.clone());

    // Ctrl+C acts as a long Back press
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = input_tx.send(InputEvent::long(InputKey::Back)).await;
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    match run(screen, config, &mut input_rx).await {
        Ok(()) => info!("Program terminated by user. Exiting gracefully."),
        Err(e) => {
            error!("Fatal error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_argument() {
        assert_eq!(Screen::from_arg(None), Some(Screen::Home));
        assert_eq!(Screen::from_arg(Some("frame")), Some(Screen::Frame));
        assert_eq!(Screen::from_arg(Some("tv")), None);
    }

    #[tokio::test]
    async fn back_press_interrupts_the_wait() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InputEvent::short(InputKey::Ok)).await.unwrap();
        tx.send(InputEvent::long(InputKey::Back)).await.unwrap();
        tx.send(InputEvent::short(InputKey::Up)).await.unwrap();

        back_pressed(&mut rx).await;
        assert_eq!(rx.recv().await, Some(InputEvent::short(InputKey::Up)));
    }

    #[tokio::test]
    async fn closed_input_interrupts_the_wait() {
        let (tx, mut rx) = mpsc::channel::<InputEvent>(1);
        drop(tx);
        back_pressed(&mut rx).await;
    }
}
