//! The scheduler's user settings file, as far as deployment cares.
//!
//! The orchestrator only guarantees the file exists. It knows the
//! application's built-in defaults so it can seed the file when no template
//! is checked in, and it reads the file back to warn about an unusable
//! notification setup. It never rewrites an existing file.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Prefix every WeCom group-robot webhook URL starts with.
pub const WEBHOOK_URL_PREFIX: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub webhook_url: String,
    /// Daily push time, `HH:MM`.
    pub push_time: String,
    pub last_push_date: String,
    /// Days ahead of a step to send reminders.
    pub reminder_days: Vec<u32>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            push_time: "08:00".to_string(),
            last_push_date: String::new(),
            reminder_days: vec![1, 2, 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub show_weekends: bool,
    pub highlight_today: bool,
    pub color_scheme: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_weekends: false,
            highlight_today: true,
            color_scheme: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub notification: NotificationSettings,
    pub display: DisplaySettings,
}

impl UserSettings {
    /// Pretty-printed JSON used when seeding the file without a template.
    pub fn default_document() -> String {
        let mut doc = serde_json::to_string_pretty(&Self::default())
            .expect("UserSettings is always serialisable");
        doc.push('\n');
        doc
    }

    /// Operator-facing problems with the notification setup.
    pub fn advisories(&self) -> Vec<String> {
        let n = &self.notification;
        let mut notes = Vec::new();
        if n.enabled && n.webhook_url.trim().is_empty() {
            notes.push("notifications are enabled but no webhook URL is set".to_string());
        } else if !n.webhook_url.is_empty() && !n.webhook_url.starts_with(WEBHOOK_URL_PREFIX) {
            notes.push(format!(
                "webhook URL does not look like a WeCom robot address ({WEBHOOK_URL_PREFIX}...)"
            ));
        }
        notes
    }
}

/// Read the settings file for advisories. Failures become advisories too;
/// the file's validity is the application's business.
pub fn inspect(path: &Path) -> Vec<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return vec![format!("could not read {}: {e}", path.display())],
    };
    match serde_json::from_str::<UserSettings>(&raw) {
        Ok(settings) => settings.advisories(),
        Err(e) => vec![format!("{} is not valid JSON: {e}", path.display())],
    }
}
