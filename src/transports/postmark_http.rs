//! The Postmark HTTP transport, generalized from the teacher's
//! `EmailClient` into a named `Transport` implementation that can carry
//! arbitrary content types and header maps (spec.md §4.2, §6). One instance
//! is built per `[[transports]]` entry of kind `postmark_http`.

use crate::configuration::TransportSettings;
use crate::engine::{OutboundMessage, Transport, TransportError};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: String,
    subject: &'a str,
    html_body: Option<&'a str>,
    text_body: Option<&'a str>,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    headers: std::collections::HashMap<&'a str, &'a str>,
}

pub struct PostmarkHttpTransport {
    name: String,
    base_url: String,
    http_client: Client,
    auth_token: Secret<String>,
}

impl PostmarkHttpTransport {
    pub fn from_settings(settings: &TransportSettings) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            name: settings.name.clone(),
            base_url: settings.base_url.clone(),
            http_client,
            auth_token: settings.auth_token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for PostmarkHttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(name = "Sending email via Postmark", skip_all)]
    async fn push(
        &self,
        message: OutboundMessage,
        _concurrency_hint: usize,
    ) -> Result<(), TransportError> {
        let url = format!("{}/email", self.base_url);
        let html_body = std::str::from_utf8(&message.body).ok();
        let text_body = if message.alt_body.is_empty() {
            None
        } else {
            std::str::from_utf8(&message.alt_body).ok()
        };

        let request_body = SendEmailRequest {
            from: &message.from,
            to: message.to.join(","),
            subject: &message.subject,
            html_body: if message.content_type.is_plain() {
                None
            } else {
                html_body
            },
            text_body: if message.content_type.is_plain() {
                html_body
            } else {
                text_body
            },
            headers: message
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        };

        self.http_client
            .post(&url)
            .header("X-Postmark-Server-Token", self.auth_token.expose_secret())
            .json(&request_body)
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?;

        Ok(())
    }

    async fn close(&self) {}
}
