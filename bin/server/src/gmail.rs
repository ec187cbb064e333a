//! Gmail delivery through the `users.messages.send` API.

use crate::auth::middleware::AuthorizedClient;
use async_trait::async_trait;
use multi_emailer_dispatch::{MessageProvider, SendOutcome, classify_status};
use reqwest::Url;
use serde::Serialize;

/// Gmail API users collection.
const GMAIL_USERS_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

/// Sends messages as the authenticated user.
#[derive(Clone)]
pub struct GmailProvider {
    client: AuthorizedClient,
    users_url: Url,
}

impl GmailProvider {
    pub fn new(client: AuthorizedClient) -> Self {
        Self {
            client,
            // Constant, known to parse.
            users_url: Url::parse(GMAIL_USERS_URL).expect("parse Gmail API URL"),
        }
    }

    /// Points the provider at another API root.
    #[must_use]
    pub fn with_users_url(mut self, users_url: Url) -> Self {
        self.users_url = users_url;
        self
    }

    fn send_url(&self, from: &str) -> Url {
        let mut url = self.users_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([from, "messages", "send"]);
        }
        url
    }
}

#[async_trait]
impl MessageProvider for GmailProvider {
    async fn send_raw(&self, from: &str, raw: &str) -> SendOutcome {
        let response = self
            .client
            .post(self.send_url(from))
            .json(&SendRequest { raw })
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let outcome = classify_status(status);
                if !matches!(outcome, SendOutcome::Delivered) {
                    let detail = response.text().await.unwrap_or_default();
                    tracing::debug!(status, detail = %detail, "Gmail rejected message");
                }
                outcome
            }
            Err(e) => SendOutcome::transport(e),
        }
    }
}
