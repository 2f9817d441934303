use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use shared::domain::ChannelId;
use shared::protocol::PushPayload;

/// Category value the chat provider stamps on its own pushes. The provider
/// renders those itself, so drawing another one would duplicate it.
pub const CHAT_CATEGORY: &str = "chat";
/// Data key carrying the provider's nested JSON blob.
const CHAT_BLOB_KEY: &str = "chat";

/// Capability to draw a local notification, provided by the host platform.
#[async_trait]
pub trait LocalNotifier: Send + Sync {
    async fn display(
        &self,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<()>;
}

pub struct MissingLocalNotifier;

#[async_trait]
impl LocalNotifier for MissingLocalNotifier {
    async fn display(
        &self,
        _title: &str,
        _body: &str,
        _data: &HashMap<String, String>,
    ) -> Result<()> {
        Err(anyhow::anyhow!("local notifier is unavailable"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    /// Chat pushes: the realtime provider shows its own system notification.
    SuppressProviderChat,
    /// The payload already carries provider-rendered notification content.
    SuppressProviderContent,
    /// Data-only, non-chat: the only case we draw ourselves.
    DrawLocal,
}

/// Pure classification shared by the foreground callback and the background
/// entry point. When in doubt this prefers under-notifying to doubling up.
pub fn decide(payload: &PushPayload) -> NotificationDecision {
    let category = payload
        .data
        .get("type")
        .or_else(|| payload.data.get("category"));
    if category.map(String::as_str) == Some(CHAT_CATEGORY) {
        return NotificationDecision::SuppressProviderChat;
    }
    if payload.notification.is_some() {
        return NotificationDecision::SuppressProviderContent;
    }
    NotificationDecision::DrawLocal
}

pub async fn handle_foreground(
    payload: &PushPayload,
    notifier: &dyn LocalNotifier,
) -> NotificationDecision {
    handle(payload, notifier).await
}

pub async fn handle_background(
    payload: &PushPayload,
    notifier: &dyn LocalNotifier,
) -> NotificationDecision {
    handle(payload, notifier).await
}

async fn handle(payload: &PushPayload, notifier: &dyn LocalNotifier) -> NotificationDecision {
    let decision = decide(payload);
    match decision {
        NotificationDecision::DrawLocal => {
            let title = payload.data.get("title").map(String::as_str).unwrap_or("");
            let body = payload.data.get("body").map(String::as_str).unwrap_or("");
            if let Err(err) = notifier.display(title, body, &payload.data).await {
                warn!(%err, "failed to draw local notification");
            }
        }
        NotificationDecision::SuppressProviderChat => {
            debug!("push: chat category, provider renders its own notification");
        }
        NotificationDecision::SuppressProviderContent => {
            debug!("push: provider-rendered content present, nothing to draw");
        }
    }
    decision
}

/// Channel id embedded in the payload, either at the root or inside the
/// provider's nested JSON blob. Used to route a notification tap.
pub fn channel_hint(payload: &PushPayload) -> Option<ChannelId> {
    if let Some(cid) = payload.data.get("channelId").filter(|s| !s.is_empty()) {
        return Some(ChannelId::new(cid.clone()));
    }
    let raw = payload.data.get(CHAT_BLOB_KEY)?;
    let blob: Value = serde_json::from_str(raw).ok()?;
    blob.get("channelId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ChannelId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::PushNotificationContent;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        drawn: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl LocalNotifier for RecordingNotifier {
        async fn display(
            &self,
            title: &str,
            body: &str,
            _data: &HashMap<String, String>,
        ) -> Result<()> {
            self.drawn
                .lock()
                .await
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn chat_payload() -> PushPayload {
        PushPayload {
            data: HashMap::from([("type".to_string(), "chat".to_string())]),
            notification: None,
        }
    }

    #[tokio::test]
    async fn chat_category_never_draws_in_either_path() {
        let notifier = RecordingNotifier::default();
        let payload = chat_payload();

        let fg = handle_foreground(&payload, &notifier).await;
        let bg = handle_background(&payload, &notifier).await;

        assert_eq!(fg, NotificationDecision::SuppressProviderChat);
        assert_eq!(fg, bg);
        assert!(notifier.drawn.lock().await.is_empty());
    }

    #[tokio::test]
    async fn provider_rendered_content_suppresses() {
        let notifier = RecordingNotifier::default();
        let payload = PushPayload {
            data: HashMap::from([("type".to_string(), "promo".to_string())]),
            notification: Some(PushNotificationContent {
                title: Some("t".into()),
                body: Some("b".into()),
            }),
        };

        let decision = handle_background(&payload, &notifier).await;
        assert_eq!(decision, NotificationDecision::SuppressProviderContent);
        assert!(notifier.drawn.lock().await.is_empty());
    }

    #[tokio::test]
    async fn data_only_non_chat_draws_once() {
        let notifier = RecordingNotifier::default();
        let payload = PushPayload {
            data: HashMap::from([
                ("type".to_string(), "promo".to_string()),
                ("title".to_string(), "Price drop".to_string()),
                ("body".to_string(), "A listing you follow".to_string()),
            ]),
            notification: None,
        };

        let decision = handle_foreground(&payload, &notifier).await;
        assert_eq!(decision, NotificationDecision::DrawLocal);
        assert_eq!(
            notifier.drawn.lock().await.as_slice(),
            &[("Price drop".to_string(), "A listing you follow".to_string())]
        );
    }

    #[test]
    fn category_fallback_key_is_honored() {
        let payload = PushPayload {
            data: HashMap::from([("category".to_string(), "chat".to_string())]),
            notification: None,
        };
        assert_eq!(decide(&payload), NotificationDecision::SuppressProviderChat);
    }

    #[test]
    fn channel_hint_prefers_root_key() {
        let payload = PushPayload {
            data: HashMap::from([
                ("channelId".to_string(), "c-root".to_string()),
                (
                    "chat".to_string(),
                    r#"{"channelId":"c-nested"}"#.to_string(),
                ),
            ]),
            notification: None,
        };
        assert_eq!(channel_hint(&payload), Some(ChannelId::new("c-root")));
    }

    #[test]
    fn channel_hint_reads_nested_blob() {
        let payload = PushPayload {
            data: HashMap::from([(
                "chat".to_string(),
                r#"{"channelId":"c-nested","otherUserId":"p7"}"#.to_string(),
            )]),
            notification: None,
        };
        assert_eq!(channel_hint(&payload), Some(ChannelId::new("c-nested")));
    }

    #[test]
    fn malformed_blob_yields_no_hint() {
        let payload = PushPayload {
            data: HashMap::from([("chat".to_string(), "{not-json".to_string())]),
            notification: None,
        };
        assert_eq!(channel_hint(&payload), None);
    }
}
