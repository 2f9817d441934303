use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use chat_core::MarketplaceBackend;
use shared::domain::{ChannelId, UserId};
use shared::error::{ApiError, ApiException};
use shared::protocol::{BlockedRow, ChannelPage, SessionToken};

#[derive(Debug, Deserialize)]
struct NotificationPrefs {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct NotificationPrefsUpdate {
    enabled: bool,
}

/// Typed client for the marketplace REST backend: the channel directory,
/// per-channel notification preferences, leave-channel and the block list.
pub struct RestBackend {
    http: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut raw = base_url.trim_end_matches('/').to_string();
        raw.push('/');
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(&raw).context("invalid backend base url")?,
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid backend endpoint: {path}"))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Non-2xx responses carry a structured `ApiError` body when the backend
    /// produced them; anything else degrades to a plain status error.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match response.json::<ApiError>().await {
            Ok(api) => Err(ApiException::from(api).into()),
            Err(_) => Err(anyhow!("backend request failed with status {status}")),
        }
    }

    /// Issue a fresh chat login token; pair with
    /// [`chat_core::SessionCache::ensure`].
    pub async fn issue_chat_token(&self) -> Result<SessionToken> {
        let response = self
            .authorized(self.http.post(self.endpoint("chat/login")?))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl MarketplaceBackend for RestBackend {
    async fn list_channels(&self, cursor: Option<&ChannelId>) -> Result<ChannelPage> {
        let mut request = self.http.get(self.endpoint("chat/channels")?);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor.as_str())]);
        }
        let response = self.authorized(request).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn channel_notifications(&self, channel_id: &ChannelId) -> Result<bool> {
        let url = self.endpoint(&format!("chat/channels/{channel_id}/notifications"))?;
        let response = self.authorized(self.http.get(url)).send().await?;
        let prefs: NotificationPrefs = Self::check(response).await?.json().await?;
        Ok(prefs.enabled)
    }

    async fn set_channel_notifications(&self, channel_id: &ChannelId, enabled: bool) -> Result<()> {
        let url = self.endpoint(&format!("chat/channels/{channel_id}/notifications"))?;
        let response = self
            .authorized(self.http.put(url))
            .json(&NotificationPrefsUpdate { enabled })
            .send()
            .await?;
        Self::check(response).await?;
        debug!(channel_id = %channel_id, enabled, "notification preference updated");
        Ok(())
    }

    async fn leave_channel(&self, channel_id: &ChannelId) -> Result<()> {
        let url = self.endpoint(&format!("chat/channels/{channel_id}/leave"))?;
        let response = self.authorized(self.http.post(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn blocked_users(&self) -> Result<Vec<BlockedRow>> {
        let response = self
            .authorized(self.http.get(self.endpoint("users/blocked")?))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn block_user(&self, user_id: &UserId) -> Result<()> {
        let url = self.endpoint(&format!("users/blocked/{user_id}"))?;
        let response = self.authorized(self.http.post(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn unblock_user(&self, user_id: &UserId) -> Result<()> {
        let url = self.endpoint(&format!("users/blocked/{user_id}"))?;
        let response = self.authorized(self.http.delete(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
