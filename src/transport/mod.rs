/// Contract with the network co-processor that performs HTTP on our behalf
pub mod uart;

use log::{info, warn};
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// Connectivity state reported by the co-processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Inactive,
    Idle,
    Sending,
    Receiving,
    Issue,
}

/// Lifecycle of the last request round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLifecycle {
    Inactive,
    Busy,
    Done,
}

/// Both status values the core reads but never sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStatus {
    pub state: AdapterState,
    pub lifecycle: RequestLifecycle,
}

impl Default for AdapterStatus {
    fn default() -> Self {
        Self {
            state: AdapterState::Inactive,
            lifecycle: RequestLifecycle::Inactive,
        }
    }
}

impl AdapterStatus {
    /// Whether a new request may be issued.
    ///
    /// Allowed when nothing is in flight (or the adapter reported an issue) and
    /// the caller has no request of its own pending, or as soon as the previous
    /// request is done.
    pub fn allows_command(&self, request_pending: bool) -> bool {
        ((self.lifecycle == RequestLifecycle::Inactive || self.state == AdapterState::Issue)
            && !request_pending)
            || self.lifecycle == RequestLifecycle::Done
    }

    /// Whether a screen may be left without abandoning a request mid-flight
    pub fn allows_back(&self, request_pending: bool) -> bool {
        (self.lifecycle == RequestLifecycle::Inactive && !request_pending)
            || self.lifecycle == RequestLifecycle::Done
            || self.state == AdapterState::Issue
    }

    /// A finished response is waiting to be decoded
    pub fn response_ready(&self) -> bool {
        self.lifecycle == RequestLifecycle::Done && self.state == AdapterState::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.state != AdapterState::Idle || self.lifecycle == RequestLifecycle::Busy
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request/response client backed by the co-processor.
///
/// Requests are fire-and-forget: the return value only says whether the
/// request could be handed over, completion is observed through `status`.
pub trait TransportClient: Send + Sync {
    fn ping(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn save_credentials(&self, ssid: &str, password: &str) -> bool;
    fn get(&self, url: &str) -> bool;
    fn post_with_headers(&self, url: &str, headers: &str, body: &str) -> bool;
    /// Only meaningful once the lifecycle reports `Done`
    fn last_response(&self) -> String;
    fn status(&self) -> AdapterStatus;
    /// Receiver notified on every status change
    fn subscribe(&self) -> watch::Receiver<AdapterStatus>;
    fn led_off(&self) -> bool {
        true
    }
}

/// Ping the co-processor until it answers, then switch its LED off.
///
/// Gives up when `cancel` completes first. Returns whether the co-processor
/// is ready.
pub async fn wait_until_ready(
    client: &dyn TransportClient,
    period: Duration,
    cancel: impl Future<Output = ()>,
) -> bool {
    let ping = async {
        while client.status().state == AdapterState::Inactive {
            client.ping();
            sleep(period).await;
        }
    };

    tokio::select! {
        _ = ping => {
            info!("Co-processor ready");
            client.led_off();
            true
        }
        _ = cancel => {
            warn!("Co-processor bootstrap cancelled");
            false
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory co-processor used by the session tests
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Request {
        Get(String),
        Post {
            url: String,
            headers: String,
            body: String,
        },
        Credentials(String, String),
    }

    pub struct FakeClient {
        status: watch::Sender<AdapterStatus>,
        pub requests: Mutex<Vec<Request>>,
        pub response: Mutex<String>,
        /// Pings go unanswered
        pub silent: AtomicBool,
        /// Posts are recorded but cannot be handed over
        pub fail_posts: AtomicBool,
    }

    impl FakeClient {
        pub fn new(status: AdapterStatus) -> Self {
            Self {
                status: watch::channel(status).0,
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(String::new()),
                silent: AtomicBool::new(false),
                fail_posts: AtomicBool::new(false),
            }
        }

        pub fn idle() -> Self {
            Self::new(AdapterStatus {
                state: AdapterState::Idle,
                lifecycle: RequestLifecycle::Inactive,
            })
        }

        pub fn set_status(&self, state: AdapterState, lifecycle: RequestLifecycle) {
            self.status.send_replace(AdapterStatus { state, lifecycle });
        }

        pub fn complete(&self, body: &str) {
            *self.response.lock().unwrap() = body.to_string();
            self.set_status(AdapterState::Idle, RequestLifecycle::Done);
        }

        pub fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl TransportClient for FakeClient {
        fn ping(&self) -> bool {
            if self.silent.load(Ordering::Relaxed) {
                return true;
            }
            self.status.send_modify(|s| s.state = AdapterState::Idle);
            true
        }

        fn is_connected(&self) -> bool {
            self.status.borrow().state != AdapterState::Inactive
        }

        fn save_credentials(&self, ssid: &str, password: &str) -> bool {
            self.requests
                .lock()
                .unwrap()
                .push(Request::Credentials(ssid.to_string(), password.to_string()));
            true
        }

        fn get(&self, url: &str) -> bool {
            self.requests.lock().unwrap().push(Request::Get(url.to_string()));
            self.status.send_modify(|s| s.lifecycle = RequestLifecycle::Busy);
            true
        }

        fn post_with_headers(&self, url: &str, headers: &str, body: &str) -> bool {
            self.requests.lock().unwrap().push(Request::Post {
                url: url.to_string(),
                headers: headers.to_string(),
                body: body.to_string(),
            });
            if self.fail_posts.load(Ordering::Relaxed) {
                return false;
            }
            self.status.send_modify(|s| s.lifecycle = RequestLifecycle::Busy);
            true
        }

        fn last_response(&self) -> String {
            self.response.lock().unwrap().clone()
        }

        fn status(&self) -> AdapterStatus {
            *self.status.borrow()
        }

        fn subscribe(&self) -> watch::Receiver<AdapterStatus> {
            self.status.subscribe()
        }
    }
}
