//! The generic JSON HTTP-postback transport (spec.md §4.2's "webhook"
//! messenger kind), grounded directly in the original `postback` messenger:
//! a fire-and-forget JSON POST of the message plus recipient/campaign
//! metadata, with a self-pacing counter that sleeps a second whenever the
//! caller-supplied concurrency hint is exceeded between pushes.

use crate::configuration::TransportSettings;
use crate::engine::{OutboundMessage, Transport, TransportError};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::sync::Mutex;

#[derive(serde::Serialize)]
struct WebhookRecipient<'a> {
    uuid: String,
    email: &'a str,
    name: &'a str,
    attribs: &'a serde_json::Value,
    status: &'a str,
}

#[derive(serde::Serialize)]
struct WebhookCampaign<'a> {
    uuid: String,
    name: &'a str,
}

#[derive(serde::Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    content_type: &'a str,
    body: String,
    recipients: Vec<WebhookRecipient<'a>>,
    campaign: Option<WebhookCampaign<'a>>,
}

pub struct WebhookTransport {
    name: String,
    root_url: String,
    http_client: Client,
    auth_header: Secret<String>,
    /// Self-pacing counter, reset to zero and slept past once it reaches the
    /// `concurrency_hint` passed into `push` (mirrors the original's `Inc`).
    pace: Mutex<usize>,
}

impl WebhookTransport {
    pub fn from_settings(settings: &TransportSettings) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            name: settings.name.clone(),
            root_url: settings.base_url.clone(),
            http_client,
            auth_header: settings.auth_token.clone(),
            pace: Mutex::new(0),
        })
    }

    /// Sleeps a second and resets the counter once `threshold` pushes have
    /// gone out since the last reset.
    async fn pace(&self, threshold: usize) {
        let should_sleep = {
            let mut count = self.pace.lock().unwrap();
            if threshold > 0 && *count >= threshold {
                *count = 0;
                true
            } else {
                *count += 1;
                false
            }
        };
        if should_sleep {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(name = "Posting to webhook", skip_all)]
    async fn push(
        &self,
        message: OutboundMessage,
        concurrency_hint: usize,
    ) -> Result<(), TransportError> {
        self.pace(concurrency_hint).await;

        let body = String::from_utf8_lossy(&message.body).into_owned();
        let recipients = vec![WebhookRecipient {
            uuid: message.subscriber.uuid.to_string(),
            email: message.subscriber.email.as_ref(),
            name: message.subscriber.name.as_ref(),
            attribs: &message.subscriber.attribs,
            status: &message.subscriber.status,
        }];
        let campaign = message.campaign.as_ref().map(|c| WebhookCampaign {
            uuid: c.uuid.to_string(),
            name: &c.name,
        });

        let payload = WebhookPayload {
            subject: &message.subject,
            content_type: content_type_label(message.content_type),
            body,
            recipients,
            campaign,
        };

        let auth_header = self.auth_header.expose_secret().clone();
        let mut request = self.http_client.post(&self.root_url).json(&payload);
        if !auth_header.is_empty() {
            request = request.header("Authorization", auth_header);
        }

        request
            .send()
            .await
            .map_err(anyhow::Error::from)?
            .error_for_status()
            .map_err(anyhow::Error::from)?;

        Ok(())
    }

    async fn close(&self) {}
}

fn content_type_label(content_type: crate::domain::ContentType) -> &'static str {
    match content_type {
        crate::domain::ContentType::Html => "html",
        crate::domain::ContentType::Plain => "plain",
        crate::domain::ContentType::Richtext => "richtext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::TransportKind;
    use crate::domain::ContentType;
    use crate::engine::ANONYMOUS_SUBSCRIBER_UUID;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_transport(base_url: &str) -> WebhookTransport {
        WebhookTransport::from_settings(&TransportSettings {
            name: "webhook".into(),
            kind: TransportKind::Webhook,
            base_url: base_url.into(),
            auth_token: Secret::new("Basic dGVzdDp0ZXN0".into()),
            timeout_ms: 200,
        })
        .unwrap()
    }

    fn sample_message() -> OutboundMessage {
        OutboundMessage {
            from: "noreply@x.test".into(),
            to: vec!["sub@x.test".into()],
            subject: "Hi there".into(),
            content_type: ContentType::Html,
            body: b"<p>hello</p>".to_vec(),
            alt_body: Vec::new(),
            headers: Default::default(),
            campaign: None,
            subscriber: crate::engine::Subscriber {
                id: 1,
                uuid: ANONYMOUS_SUBSCRIBER_UUID,
                email: crate::domain::SubscriberEmailAddress::parse("sub@x.test".into()).unwrap(),
                name: crate::domain::SubscriberName::parse("Sub".into()).unwrap(),
                attribs: serde_json::Value::Null,
                status: "enabled".into(),
            },
        }
    }

    #[tokio::test]
    async fn push_posts_json_with_an_authorization_header() {
        let mock_server = MockServer::start().await;
        let transport = test_transport(&mock_server.uri());
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = transport.push(sample_message(), 5).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn pace_sleeps_once_the_threshold_is_reached() {
        let mock_server = MockServer::start().await;
        let transport = test_transport(&mock_server.uri());
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&mock_server)
            .await;

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            transport.push(sample_message(), 2).await.unwrap();
        }
        assert!(start.elapsed() >= std::time::Duration::from_secs(1));
    }
}
