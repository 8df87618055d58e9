//! REST client for the chat list.
//!
//! The backend owns chats; this client only fetches the list once so the
//! unread engine can be seeded with authoritative state.

use anyhow::{Context, Result};
use reqwest::Client;

use crate::chat::ChatSummary;
use crate::constants;

/// API client for the chat endpoints.
#[derive(Debug, Clone)]
pub struct ChatApi {
    client: Client,
    server_url: String,
    token: Option<String>,
}

impl ChatApi {
    /// Creates a new API client.
    ///
    /// # Arguments
    ///
    /// * `server_url` - Base URL of the backend (no trailing path)
    /// * `token` - Session token sent as a Bearer credential, if known
    pub fn new(server_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self::with_client(client, server_url, token))
    }

    /// Creates an API client with a pre-configured HTTP client.
    pub fn with_client(client: Client, server_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Fetch every chat the user participates in.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success,
    /// or the body is not a JSON array of chat records.
    pub async fn fetch_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>> {
        let url = format!("{}/api/chats/user/{}", self.server_url, user_id);

        let mut request = self.client.get(&url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch chats: {}", response.status());
        }

        let chats: Vec<ChatSummary> = response
            .json()
            .await
            .context("chat list is not valid JSON")?;
        log::debug!("Fetched {} chat(s) for user {}", chats.len(), user_id);
        Ok(chats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_trailing_slash_trimmed() {
        let api = ChatApi::new("https://api.example.com/", None).unwrap();
        assert_eq!(api.server_url(), "https://api.example.com");
    }
}
