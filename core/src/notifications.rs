//! One-shot user notifications.
//!
//! The core emits [`NotificationRequest`] values; rendering them is the
//! collaborator's problem. The notifier is an injected dependency owned by
//! the controller rather than process-global state, so separate controller
//! instances (and tests) cannot leak notifications into each other.

use serde::Serialize;
use tracing::info;
use tracing::warn;

/// User activation carried back from a rendered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationAction {
    /// Open the preferences surface so the user can trigger an install.
    OpenPreferences,
}

/// At most one of these is produced per triggering event; requests are not
/// retried or deduplicated beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, request: &NotificationRequest);
}

/// Discards notifications. Useful headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, request: &NotificationRequest) {
        info!("notification suppressed: {}", request.title);
    }
}

/// Spawns a user-configured program with the request appended as one JSON
/// argument, e.g. `notify_command = ["accentd-notify"]`. The child is not
/// awaited; a notifier that hangs must not stall the controller.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    argv: Vec<String>,
}

impl CommandNotifier {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, request: &NotificationRequest) {
        let Some(program) = self.argv.first() else {
            warn!("notify command is empty; dropping notification");
            return;
        };
        let payload = match serde_json::to_string(request) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to serialize notification: {err}");
                return;
            }
        };
        let mut command = std::process::Command::new(program);
        command.args(&self.argv[1..]).arg(payload);
        match command.spawn() {
            Ok(_child) => {}
            Err(err) => warn!("failed to spawn notify command `{program}`: {err}"),
        }
    }
}
