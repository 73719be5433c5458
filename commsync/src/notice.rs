//! User-visible notices (toasts). The session only publishes them; showing
//! them is up to whoever subscribes.

use std::time::Duration;

use tokio::sync::broadcast;

/// How long an error notice stays up unless dismissed.
pub const ERROR_AUTO_CLOSE: Duration = Duration::from_secs(10);

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub auto_close: Option<Duration>,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Error,
            message: message.into(),
            auto_close: Some(ERROR_AUTO_CLOSE),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Info,
            message: message.into(),
            auto_close: None,
        }
    }

    /// The message split for display, one entry per line break.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message.lines()
    }
}

/// Fans notices out to any number of receivers. Receivers that fall behind
/// lose the oldest notices; nobody listening is fine.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notice>,
    auto_close: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, ERROR_AUTO_CLOSE)
    }
}

impl Notifier {
    /// `auto_close` applies to the error notices built by [`Notifier::error`].
    pub fn new(capacity: usize, auto_close: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Notifier { sender, auto_close }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => tracing::error!("notice: {}", notice.message),
            NoticeLevel::Info => tracing::info!("notice: {}", notice.message),
        }
        // Err only means there are no receivers
        let _ = self.sender.send(notice);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(Notice {
            auto_close: Some(self.auto_close),
            ..Notice::error(message)
        });
    }
}
