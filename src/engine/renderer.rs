use crate::engine::campaign::{ALT_BODY_TPL, BODY_TPL, SUBJECT_TPL};
use crate::engine::template_funcs::fill_placeholders;
use crate::engine::{Campaign, CampaignMessage, Subscriber};
use crate::telemetry::error_chain_fmt;

#[derive(serde::Serialize)]
struct SubscriberView<'a> {
    id: i64,
    uuid: String,
    email: &'a str,
    name: &'a str,
    attribs: &'a serde_json::Value,
}

#[derive(serde::Serialize)]
struct CampaignView<'a> {
    id: i64,
    uuid: String,
    name: &'a str,
}

/// Per-subscriber template-execution failure (spec.md §4.6: "any template
/// execution error propagates; the fetch loop logs and skips the
/// subscriber").
#[derive(thiserror::Error)]
#[error(transparent)]
pub struct RenderError(#[from] tera::Error);

impl std::fmt::Debug for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Renders a `CampaignMessage` for `subscriber` from `campaign`'s compiled
/// template (spec.md §4.6). `campaign` must already be admitted
/// (`campaign.is_compiled()`); the fetch loop only ever calls this on
/// `ActiveSet` entries, which guarantees that.
pub fn render(campaign: &Campaign, subscriber: &Subscriber, unsub_url_fmt: &str) -> Result<CampaignMessage, RenderError> {
    let tpl = campaign
        .template
        .as_deref()
        .expect("render called on an uncompiled campaign");

    let mut context = tera::Context::new();
    context.insert(
        "subscriber",
        &SubscriberView {
            id: subscriber.id,
            uuid: subscriber.uuid.to_string(),
            email: subscriber.email.as_ref(),
            name: subscriber.name.as_ref(),
            attribs: &subscriber.attribs,
        },
    );
    context.insert(
        "campaign",
        &CampaignView {
            id: campaign.id.0,
            uuid: campaign.uuid.to_string(),
            name: &campaign.name,
        },
    );

    let subject = if campaign.subject_is_template {
        tpl.render(SUBJECT_TPL, &context)?
    } else {
        campaign.subject.clone()
    };

    let body = tpl.render(BODY_TPL, &context)?.into_bytes();

    let alt_body = if campaign.content_type.is_plain() {
        Vec::new()
    } else if campaign.alt_body_is_template {
        tpl.render(ALT_BODY_TPL, &context)?.into_bytes()
    } else {
        campaign
            .alt_body
            .as_ref()
            .map(|s| s.clone().into_bytes())
            .unwrap_or_default()
    };

    let unsubscribe_url = fill_placeholders(
        unsub_url_fmt,
        &[&campaign.uuid.to_string(), &subscriber.uuid.to_string()],
    );

    Ok(CampaignMessage {
        campaign: campaign.clone(),
        subscriber: subscriber.clone(),
        from: campaign.from_email.clone(),
        to: subscriber.email.as_ref().to_string(),
        subject,
        body,
        alt_body,
        unsubscribe_url,
    })
}
