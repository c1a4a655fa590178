use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use allybot_types::ChannelId;

use crate::platform::{MessageTarget, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Structured action log plus the single path for administrator alerts.
#[derive(Clone)]
pub struct AuditLog {
    platform: Arc<dyn Platform>,
    log_channel: Option<ChannelId>,
    admin_contact: Option<MessageTarget>,
}

impl AuditLog {
    pub fn new(
        platform: Arc<dyn Platform>,
        log_channel: Option<ChannelId>,
        admin_contact: Option<MessageTarget>,
    ) -> Self {
        Self {
            platform,
            log_channel,
            admin_contact,
        }
    }

    /// Fire-and-forget: the mirror into the log channel runs detached and its
    /// failure is only traced.
    pub fn write_log(&self, action: &str, payload: Value, severity: Severity) {
        match severity {
            Severity::Info => info!(action, %payload, "audit"),
            Severity::Warning => warn!(action, %payload, "audit"),
            Severity::Error => error!(action, %payload, "audit"),
        }

        let Some(channel) = self.log_channel else {
            return;
        };
        let platform = self.platform.clone();
        let content = format!("[{}] {}: {}", severity.label(), action, payload);
        tokio::spawn(async move {
            if let Err(e) = platform.send_message(MessageTarget::Channel(channel), &content).await {
                warn!("Failed to mirror audit entry to channel {}: {}", channel, e);
            }
        });
    }

    /// Tells the administrator contact that a command left work undone.
    pub async fn notify_admin(&self, command: &str, detail: &str) {
        error!(command, detail, "Administrator attention required");

        let Some(target) = self.admin_contact else {
            warn!("No admin contact configured; alert for `{}` only logged", command);
            return;
        };
        let content = format!("⚠️ `/{}` needs attention: {}", command, detail);
        if let Err(e) = self.platform.send_message(target, &content).await {
            error!("Failed to notify admin at {}: {}", target, e);
        }
    }
}
