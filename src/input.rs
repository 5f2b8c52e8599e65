/// Button events, page navigation and the pressed-key highlight
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

pub use crate::models::PressType;

/// How long a pressed key stays highlighted
pub const RESET_KEY_PERIOD: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKey {
    Up,
    Down,
    Left,
    Right,
    Ok,
    Back,
}

impl InputKey {
    const ALL: [InputKey; 6] = [
        InputKey::Up,
        InputKey::Down,
        InputKey::Left,
        InputKey::Right,
        InputKey::Ok,
        InputKey::Back,
    ];

    fn code(self) -> u8 {
        self as u8 + 1
    }

    fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code).checked_sub(1)?).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub key: InputKey,
    pub press: PressType,
}

impl InputEvent {
    pub fn short(key: InputKey) -> Self {
        Self {
            key,
            press: PressType::Short,
        }
    }

    pub fn long(key: InputKey) -> Self {
        Self {
            key,
            press: PressType::Long,
        }
    }
}

/// What the navigation layer should do after an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Ignored,
    Handled,
    Redraw,
    /// Leave the screen if the session allows it
    CheckBack,
    /// Leave the screen unconditionally
    ForceBack,
}

/// Console key mapping: `w a s d` arrows, `o` ok, `b` back. Upper case is a
/// long press.
pub fn parse_key(line: &str) -> Option<InputEvent> {
    let mut chars = line.trim().chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    let key = match c.to_ascii_lowercase() {
        'w' => InputKey::Up,
        's' => InputKey::Down,
        'a' => InputKey::Left,
        'd' => InputKey::Right,
        'o' => InputKey::Ok,
        'b' => InputKey::Back,
        _ => return None,
    };
    let press = if c.is_ascii_uppercase() {
        PressType::Long
    } else {
        PressType::Short
    };
    Some(InputEvent { key, press })
}

pub fn previous_page(page: usize) -> usize {
    page.saturating_sub(1)
}

pub fn next_page(page: usize, page_count: usize) -> usize {
    if page + 1 < page_count {
        page + 1
    } else {
        page
    }
}

/// Last pressed key, cleared by a one-shot timer
pub struct KeyHighlight {
    last: Arc<AtomicU8>,
    timer: Option<JoinHandle<()>>,
}

impl KeyHighlight {
    pub fn new() -> Self {
        Self {
            last: Arc::new(AtomicU8::new(0)),
            timer: None,
        }
    }

    pub fn last(&self) -> Option<InputKey> {
        InputKey::from_code(self.last.load(Ordering::Acquire))
    }

    /// Record a press. For tracked keys, repeating the highlighted key (or
    /// pressing after a reset) re-arms the reset timer, a different key
    /// cancels it.
    pub fn press(&mut self, key: InputKey, tracked: bool) {
        if tracked {
            let last = self.last();
            if last.is_none() || last == Some(key) {
                self.restart();
            } else {
                self.cancel();
            }
        }
        self.last.store(key.code(), Ordering::Release);
    }

    fn restart(&mut self) {
        self.cancel();
        let last = self.last.clone();
        self.timer = Some(tokio::spawn(async move {
            sleep(RESET_KEY_PERIOD).await;
            last.store(0, Ordering::Release);
        }));
    }

    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Default for KeyHighlight {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeyHighlight {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_keys() {
        assert_eq!(parse_key("a"), Some(InputEvent::short(InputKey::Left)));
        assert_eq!(parse_key("S\n"), Some(InputEvent::long(InputKey::Down)));
        assert_eq!(parse_key("B"), Some(InputEvent::long(InputKey::Back)));
        assert_eq!(parse_key("x"), None);
        assert_eq!(parse_key("ab"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn pages_are_clamped() {
        assert_eq!(previous_page(0), 0);
        assert_eq!(previous_page(2), 1);
        assert_eq!(next_page(0, 3), 1);
        assert_eq!(next_page(2, 3), 2);
        assert_eq!(next_page(0, 1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn highlight_resets_after_period() {
        let mut highlight = KeyHighlight::new();
        highlight.press(InputKey::Down, true);
        assert_eq!(highlight.last(), Some(InputKey::Down));

        sleep(RESET_KEY_PERIOD + Duration::from_millis(1)).await;
        assert_eq!(highlight.last(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn different_key_cancels_reset() {
        let mut highlight = KeyHighlight::new();
        highlight.press(InputKey::Left, true);
        highlight.press(InputKey::Right, true);

        sleep(RESET_KEY_PERIOD * 2).await;
        assert_eq!(highlight.last(), Some(InputKey::Right));

        // Same key again arms the timer
        highlight.press(InputKey::Right, true);
        sleep(RESET_KEY_PERIOD + Duration::from_millis(1)).await;
        assert_eq!(highlight.last(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn untracked_keys_never_arm_the_timer() {
        let mut highlight = KeyHighlight::new();
        highlight.press(InputKey::Back, false);
        sleep(RESET_KEY_PERIOD * 2).await;
        assert_eq!(highlight.last(), Some(InputKey::Back));
    }
}
