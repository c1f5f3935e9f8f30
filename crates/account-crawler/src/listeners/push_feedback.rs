//! Drops push tokens the push provider reported as uninstalled.

use crate::config::PushFeedbackConfig;
use crate::error::ListenerError;
use crate::listener::AccountCrawlListener;
use account_store::{Account, Device};
use accounts::AccountsManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct PushFeedbackProcessor {
    manager: Arc<AccountsManager>,
    config: PushFeedbackConfig,
}

#[derive(Debug, PartialEq, Eq)]
enum Feedback {
    /// The report stands: the device has not been seen since.
    Uninstalled,
    /// The device came back after the report.
    Superseded,
}

/// Judge a device's uninstall report once it is older than `cutoff`.
fn feedback(device: &Device, cutoff: DateTime<Utc>) -> Option<Feedback> {
    let reported = device.push.uninstalled_feedback?;
    if reported >= cutoff {
        return None;
    }
    if device.last_seen < reported {
        Some(Feedback::Uninstalled)
    } else {
        Some(Feedback::Superseded)
    }
}

impl PushFeedbackProcessor {
    pub fn new(manager: Arc<AccountsManager>, config: PushFeedbackConfig) -> Self {
        Self { manager, config }
    }
}

#[async_trait]
impl AccountCrawlListener for PushFeedbackProcessor {
    fn name(&self) -> &str {
        "push_feedback_processor"
    }

    async fn on_chunk(&self, _cursor: Option<Uuid>, accounts: &[Account]) -> Result<(), ListenerError> {
        if !self.config.enabled {
            return Ok(());
        }
        let grace = chrono::Duration::from_std(self.config.feedback_grace)
            .map_err(|e| ListenerError::Other(format!("invalid feedback_grace: {}", e)))?;
        let cutoff = match Utc::now().checked_sub_signed(grace) {
            Some(cutoff) => cutoff,
            None => return Ok(()),
        };

        let mut updated = 0;
        for account in accounts {
            if !account.devices.values().any(|d| feedback(d, cutoff).is_some()) {
                continue;
            }
            self.manager
                .update(account, |account| {
                    let mut changed = false;
                    for device in account.devices.values_mut() {
                        match feedback(device, cutoff) {
                            Some(Feedback::Uninstalled) => {
                                device.push.clear_tokens();
                                changed = true;
                            }
                            Some(Feedback::Superseded) => {
                                device.push.uninstalled_feedback = None;
                                changed = true;
                            }
                            None => {}
                        }
                    }
                    changed
                })
                .await?;
            updated += 1;
        }

        if updated > 0 {
            debug!("Processed push feedback for {} accounts", updated);
        }
        Ok(())
    }
}
