use async_trait::async_trait;
use wfcore::{ChannelType, NotificationError, NotificationMessage, NotificationService};

/// Notification sink that writes every delivery to the log.
pub struct TracingNotifier {
    channels: Vec<ChannelType>,
}

impl TracingNotifier {
    /// Accept every channel.
    pub fn new() -> Self {
        Self {
            channels: vec![ChannelType::Email, ChannelType::Sms, ChannelType::InApp],
        }
    }

    /// Accept only the given channels; others fail delivery.
    pub fn with_channels(channels: impl Into<Vec<ChannelType>>) -> Self {
        Self {
            channels: channels.into(),
        }
    }
}

impl Default for TracingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationService for TracingNotifier {
    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &str,
    ) -> Result<(), NotificationError> {
        if !self.channels.contains(&message.channel) {
            return Err(NotificationError::UnsupportedChannel(message.channel.to_string()));
        }
        tracing::info!(
            channel = %message.channel,
            recipient,
            title = %message.title,
            "notification: {}",
            message.content
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_channel_fails_every_recipient() {
        let notifier = TracingNotifier::with_channels([ChannelType::Email]);
        let recipients = vec!["a".to_string(), "b".to_string()];
        let results = notifier
            .send_notification("t", "c", &recipients, ChannelType::Sms)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_err()));

        let results = notifier
            .send_notification("t", "c", &recipients, ChannelType::Email)
            .await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
