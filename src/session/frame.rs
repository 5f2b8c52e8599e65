/// Photo-frame remote over the Wi-Fi co-processor
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{ScreenTimers, SessionError, TransportSession};
use crate::config::WifiTarget;
use crate::input::{InputEvent, InputKey, InputOutcome};
use crate::models::PressType;
use crate::transport::{AdapterState, AdapterStatus, RequestLifecycle, TransportClient};
use crate::utils::format_response;
use crate::view::{Redraw, SharedView, FRAME_DRAW_PERIOD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCommand {
    Prev,
    Next,
    Rand,
    Shutdown,
}

impl FrameCommand {
    pub fn path(self) -> &'static str {
        match self {
            FrameCommand::Prev => "/prev",
            FrameCommand::Next => "/next",
            FrameCommand::Rand => "/rand",
            FrameCommand::Shutdown => "/shutdown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FrameCommand::Prev => "PREV",
            FrameCommand::Next => "NEXT",
            FrameCommand::Rand => "RAND",
            FrameCommand::Shutdown => "STDN",
        }
    }
}

/// Indicator state shown next to the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Error,
    Idle,
    Loading,
}

impl FrameStatus {
    pub fn derive(status: AdapterStatus, request_sent: bool) -> Self {
        let done = status.lifecycle == RequestLifecycle::Done;
        if status.state == AdapterState::Issue && request_sent {
            FrameStatus::Error
        } else if (status.lifecycle == RequestLifecycle::Busy || request_sent) && !done {
            FrameStatus::Loading
        } else if done || (!request_sent && status.state == AdapterState::Idle) {
            FrameStatus::Idle
        } else {
            FrameStatus::Error
        }
    }
}

pub struct FrameSession<C: TransportClient> {
    client: Arc<C>,
    base_url: String,
    selected: Option<FrameCommand>,
    request_sent: bool,
    timers: ScreenTimers,
}

impl<C: TransportClient> FrameSession<C> {
    pub fn start(
        client: Arc<C>,
        target: &WifiTarget,
        view: SharedView,
        redraw: mpsc::Sender<Redraw>,
    ) -> Self {
        if client.save_credentials(&target.ssid, &target.password) {
            info!("Attempting connection to ssid: {}", target.ssid);
        } else {
            warn!("Failed to connect to frame WiFi");
        }

        Self {
            client,
            base_url: target.url.trim_end_matches('/').to_string(),
            selected: None,
            request_sent: false,
            timers: ScreenTimers::start(view, FRAME_DRAW_PERIOD, redraw),
        }
    }

    pub fn status(&self) -> FrameStatus {
        FrameStatus::derive(self.client.status(), self.request_sent)
    }

    fn allows_command(&self) -> bool {
        self.client.status().allows_command(self.request_sent)
    }

    fn select(&mut self, command: FrameCommand) -> bool {
        if !self.allows_command() {
            return false;
        }
        self.selected = Some(command);
        true
    }

    fn send(&mut self) -> bool {
        let command = match self.selected {
            Some(command) if self.allows_command() => command,
            _ => return false,
        };
        let url = format!("{}{}", self.base_url, command.path());
        info!("Sending {} to {}", command.label(), url);
        self.request_sent = self.client.get(&url);
        true
    }
}

impl<C: TransportClient> TransportSession for FrameSession<C> {
    fn name(&self) -> &'static str {
        "Frame Remote"
    }

    async fn on_input(&mut self, event: InputEvent) -> InputOutcome {
        if event.key != InputKey::Back {
            self.timers.highlight.press(event.key, true);
        }

        let handled = match (event.press, event.key) {
            (PressType::Short, InputKey::Ok) => self.send(),
            (PressType::Short, InputKey::Left) => self.select(FrameCommand::Prev),
            (PressType::Short, InputKey::Right) => self.select(FrameCommand::Next),
            (PressType::Short, InputKey::Down) => self.select(FrameCommand::Rand),
            (PressType::Short, InputKey::Back) => return InputOutcome::CheckBack,
            (PressType::Long, InputKey::Up) => self.select(FrameCommand::Shutdown) && self.send(),
            (PressType::Long, InputKey::Back) => return InputOutcome::ForceBack,
            _ => return InputOutcome::Ignored,
        };

        if handled {
            InputOutcome::Handled
        } else {
            InputOutcome::Ignored
        }
    }

    async fn refresh(&mut self, _force: bool) -> bool {
        false
    }

    fn loading(&self) -> bool {
        self.status() == FrameStatus::Loading
    }

    fn allows_back(&self) -> bool {
        self.client.status().allows_back(self.request_sent)
    }

    fn last_key(&self) -> Option<InputKey> {
        self.timers.highlight.last()
    }

    fn exit_text(&self) -> Option<String> {
        Some(format_response(&self.client.last_response()))
    }

    async fn stop(self) -> Result<(), SessionError> {
        drop(self.timers);
        Ok(())
    }
}
