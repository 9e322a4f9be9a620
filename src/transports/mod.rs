//! Concrete `Transport` implementations and the small factory that turns a
//! `[[transports]]` configuration entry into one (spec.md §4.2, §6).

mod postmark_http;
mod webhook;

pub use postmark_http::PostmarkHttpTransport;
pub use webhook::WebhookTransport;

use crate::configuration::{TransportKind, TransportSettings};
use crate::engine::Transport;
use std::sync::Arc;

/// Builds the `Transport` matching a configuration entry's `kind`.
pub fn build(settings: &TransportSettings) -> Result<Arc<dyn Transport>, anyhow::Error> {
    match settings.kind {
        TransportKind::PostmarkHttp => {
            Ok(Arc::new(PostmarkHttpTransport::from_settings(settings)?))
        }
        TransportKind::Webhook => Ok(Arc::new(WebhookTransport::from_settings(settings)?)),
    }
}
