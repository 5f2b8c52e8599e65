/// Serial co-processor client speaking a bracket-tagged line protocol
///
/// Requests are single lines such as `[GET]<url>` or `[POST/HTTP]{json}`.
/// Responses arrive as `[GET/SUCCESS]`, the body lines, then `[GET/END]`
/// (likewise for POST), or a single `[ERROR]...` line.
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::{AdapterState, AdapterStatus, RequestLifecycle, TransportClient, TransportError};

pub const DEFAULT_BAUD: u32 = 115_200;
const READ_TIMEOUT_MS: u64 = 100;

/// Status and response buffer written by the reader, read by the client
pub struct SharedLink {
    status: watch::Sender<AdapterStatus>,
    response: Mutex<String>,
}

impl SharedLink {
    pub fn new() -> Self {
        Self {
            status: watch::channel(AdapterStatus::default()).0,
            response: Mutex::new(String::new()),
        }
    }

    fn set(&self, state: AdapterState, lifecycle: Option<RequestLifecycle>) {
        self.status.send_modify(|s| {
            s.state = state;
            if let Some(lifecycle) = lifecycle {
                s.lifecycle = lifecycle;
            }
        });
    }

    fn store_response(&self, body: String) {
        match self.response.lock() {
            Ok(mut response) => *response = body,
            Err(poisoned) => *poisoned.into_inner() = body,
        }
    }

    fn response(&self) -> String {
        match self.response.lock() {
            Ok(response) => response.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for SharedLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Line parser for co-processor output, kept apart from the port for testing
#[derive(Debug, Default)]
pub struct ResponseParser {
    body: Option<String>,
}

impl ResponseParser {
    pub fn feed(&mut self, line: &str, link: &SharedLink) {
        match line {
            "[PONG]" => {
                if link.status.borrow().state == AdapterState::Inactive {
                    info!("Co-processor answered ping");
                    link.set(AdapterState::Idle, None);
                }
            }
            "[SUCCESS]" => link.set(AdapterState::Idle, None),
            "[GET/SUCCESS]" | "[POST/SUCCESS]" => {
                self.body = Some(String::new());
                link.set(AdapterState::Receiving, None);
            }
            "[GET/END]" | "[POST/END]" => {
                let body = self.body.take().unwrap_or_default();
                debug!("Response complete: {} bytes", body.len());
                link.store_response(body);
                link.set(AdapterState::Idle, Some(RequestLifecycle::Done));
            }
            _ if line.starts_with("[ERROR]") => {
                warn!("Co-processor reported: {}", line);
                self.body = None;
                link.store_response(line.to_string());
                link.set(AdapterState::Issue, Some(RequestLifecycle::Done));
            }
            _ if line.starts_with("[INFO]") => debug!("{}", line),
            _ => match self.body.as_mut() {
                Some(body) => {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(line);
                }
                None => debug!("Ignoring co-processor output: {}", line),
            },
        }
    }
}

/// Client for the UART-attached network co-processor
pub struct UartClient {
    port: Mutex<Box<dyn serialport::SerialPort>>,
    link: Arc<SharedLink>,
    running: Arc<AtomicBool>,
}

impl UartClient {
    /// Open the port and start the blocking reader. Must run inside a tokio runtime.
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()?;
        let reader = port.try_clone()?;

        let link = Arc::new(SharedLink::new());
        let running = Arc::new(AtomicBool::new(true));
        {
            let link = link.clone();
            let running = running.clone();
            tokio::task::spawn_blocking(move || read_loop(reader, link, running));
        }

        info!("Co-processor UART opened on {} at {} baud", path, baud);
        Ok(Self {
            port: Mutex::new(port),
            link,
            running,
        })
    }

    fn send_line(&self, line: &str) -> bool {
        let mut port = match self.port.lock() {
            Ok(port) => port,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = port
            .write_all(line.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush());
        match result {
            Ok(()) => {
                debug!("-> {}", line);
                true
            }
            Err(e) => {
                error!("UART write failed: {}", e);
                false
            }
        }
    }

    fn send_request(&self, line: &str) -> bool {
        self.link
            .set(AdapterState::Sending, Some(RequestLifecycle::Busy));
        if self.send_line(line) {
            true
        } else {
            self.link
                .set(AdapterState::Issue, Some(RequestLifecycle::Inactive));
            false
        }
    }
}

impl Drop for UartClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Embed a JSON string argument as an object when it parses, as text otherwise
fn json_or_text(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn post_line(url: &str, headers: &str, body: &str) -> String {
    let request = json!({
        "url": url,
        "headers": json_or_text(headers),
        "payload": json_or_text(body),
    });
    format!("[POST/HTTP]{}", request)
}

impl TransportClient for UartClient {
    fn ping(&self) -> bool {
        self.send_line("[PING]")
    }

    fn is_connected(&self) -> bool {
        !matches!(
            self.link.status.borrow().state,
            AdapterState::Inactive | AdapterState::Issue
        )
    }

    fn save_credentials(&self, ssid: &str, password: &str) -> bool {
        let request = json!({ "ssid": ssid, "password": password });
        self.send_line(&format!("[WIFI/SAVE]{}", request))
    }

    fn get(&self, url: &str) -> bool {
        self.send_request(&format!("[GET]{}", url))
    }

    fn post_with_headers(&self, url: &str, headers: &str, body: &str) -> bool {
        self.send_request(&post_line(url, headers, body))
    }

    fn last_response(&self) -> String {
        self.link.response()
    }

    fn status(&self) -> AdapterStatus {
        *self.link.status.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<AdapterStatus> {
        self.link.status.subscribe()
    }

    fn led_off(&self) -> bool {
        self.send_line("[LED/OFF]")
    }
}

fn read_loop(port: Box<dyn serialport::SerialPort>, link: Arc<SharedLink>, running: Arc<AtomicBool>) {
    let mut reader = BufReader::new(port);
    let mut parser = ResponseParser::default();
    let mut buf = Vec::new();

    while running.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(READ_TIMEOUT_MS)),
            Ok(_) if buf.ends_with(b"\n") => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("<- {}", line);
                    parser.feed(line, &link);
                }
                buf.clear();
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                error!("UART read failed: {}", e);
                link.set(AdapterState::Issue, Some(RequestLifecycle::Done));
                break;
            }
        }
    }
    debug!("UART reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ResponseParser, link: &SharedLink, lines: &[&str]) {
        for line in lines {
            parser.feed(line, link);
        }
    }

    #[test]
    fn pong_brings_adapter_online() {
        let link = SharedLink::new();
        let mut parser = ResponseParser::default();
        assert_eq!(link.status.borrow().state, AdapterState::Inactive);
        parser.feed("[PONG]", &link);
        assert_eq!(link.status.borrow().state, AdapterState::Idle);
    }

    #[test]
    fn post_response_body_is_collected() {
        let link = SharedLink::new();
        let mut parser = ResponseParser::default();
        feed_all(
            &mut parser,
            &link,
            &["[POST/SUCCESS]", "{\"bt\":\"21.3\",", "\"co\":\"415\"}", "[POST/END]"],
        );

        let status = *link.status.borrow();
        assert!(status.response_ready());
        assert_eq!(link.response(), "{\"bt\":\"21.3\",\n\"co\":\"415\"}");
    }

    #[test]
    fn error_marks_issue_and_unblocks() {
        let link = SharedLink::new();
        let mut parser = ResponseParser::default();
        feed_all(&mut parser, &link, &["[GET/SUCCESS]", "partial", "[ERROR] timeout"]);

        let status = *link.status.borrow();
        assert_eq!(status.state, AdapterState::Issue);
        assert_eq!(status.lifecycle, RequestLifecycle::Done);
        assert!(status.allows_command(true));
        assert_eq!(link.response(), "[ERROR] timeout");
    }

    #[test]
    fn stray_lines_outside_a_response_are_ignored() {
        let link = SharedLink::new();
        let mut parser = ResponseParser::default();
        feed_all(&mut parser, &link, &["boot banner", "[INFO] wifi up"]);
        assert_eq!(link.response(), "");
    }

    #[test]
    fn post_line_embeds_json_arguments() {
        let line = post_line(
            "http://ha.local/api/sensors",
            r#"{"Content-Type":"application/json"}"#,
            r#"{"token":"abc"}"#,
        );
        let payload: Value = serde_json::from_str(line.trim_start_matches("[POST/HTTP]")).unwrap();
        assert_eq!(payload["url"], "http://ha.local/api/sensors");
        assert_eq!(payload["headers"]["Content-Type"], "application/json");
        assert_eq!(payload["payload"]["token"], "abc");
    }
}
