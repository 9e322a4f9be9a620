//! The function bindings injected into every compiled campaign template.
//! Most of the generic text utilities templates commonly need
//! (`lower`/`upper`/`trim`/`replace`/`split`/`join`/`default`, and `safe`
//! itself) are already Tera built-in filters, so they need no reimplementing
//! here — only `quote` and the `now` function are genuinely new. The
//! URL/HTML-producing helpers (`track_link`, `track_view`,
//! `unsubscribe_url`, `optin_url`, `message_url`) are registered as Tera
//! *functions* rather than filters since they don't transform an existing
//! value, matching Tera's own filter/function split.

use crate::engine::{CampaignId, DataSource, LinkRegistry, ANONYMOUS_SUBSCRIBER_UUID};
use std::collections::HashMap;
use std::sync::Arc;
use tera::{Result as TeraResult, Tera, Value};
use uuid::Uuid;

/// Fills successive `%s` placeholders in `template` from `args`, in order.
/// Rust has no direct analogue of Go's `fmt.Sprintf` over a runtime format
/// string, so the handful of `%s`-templated URL formats from configuration
/// are filled positionally by hand.
pub(crate) fn fill_placeholders(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' && chars.peek() == Some(&'s') {
            chars.next();
            if let Some(arg) = args.next() {
                out.push_str(arg);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn get_str_arg(args: &HashMap<String, Value>, name: &str) -> TeraResult<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string().trim_matches('"').to_string()),
        None => Err(tera::Error::msg(format!("missing template function argument `{name}`"))),
    }
}

fn get_opt_str_arg(args: &HashMap<String, Value>, name: &str) -> String {
    match args.get(name) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn subscriber_uuid(args: &HashMap<String, Value>, individual_tracking: bool) -> TeraResult<Uuid> {
    if !individual_tracking {
        return Ok(ANONYMOUS_SUBSCRIBER_UUID);
    }
    let raw = get_str_arg(args, "sub_uuid")?;
    Uuid::parse_str(&raw).map_err(|e| tera::Error::msg(e.to_string()))
}

/// Everything the per-campaign function closures need: configuration, the
/// process-wide link registry, and the data source to register new links
/// against. Built once per campaign admission.
pub struct TemplateFuncContext {
    pub data_source: Arc<dyn DataSource>,
    pub link_registry: Arc<LinkRegistry>,
    pub campaign_id: CampaignId,
    pub campaign_uuid: Uuid,
    pub individual_tracking: bool,
    pub unsub_url: String,
    pub optin_url: String,
    pub link_track_url: String,
    pub view_track_url: String,
    pub message_url: String,
}

/// Registers all tracking/unsubscribe bindings plus the `now`
/// function into `tera`, closing each over `ctx`.
pub fn register(tera: &mut Tera, ctx: TemplateFuncContext) {
    let ctx = Arc::new(ctx);

    tera.register_function("track_link", {
        let ctx = ctx.clone();
        move |args: &HashMap<String, Value>| -> TeraResult<Value> {
            let url = get_str_arg(args, "url")?;
            let base_url = get_opt_str_arg(args, "base_url");
            let sub_uuid = subscriber_uuid(args, ctx.individual_tracking)?;

            let token = ctx.link_registry.resolve(&ctx.data_source, &url);

            let url_template = if base_url.trim().is_empty() {
                ctx.link_track_url.clone()
            } else {
                format!("{}/link/%s/%s/%s", base_url.trim_end_matches('/'))
            };
            Ok(Value::String(fill_placeholders(
                &url_template,
                &[&token, &ctx.campaign_uuid.to_string(), &sub_uuid.to_string()],
            )))
        }
    });

    tera.register_function("track_view", {
        let ctx = ctx.clone();
        move |args: &HashMap<String, Value>| -> TeraResult<Value> {
            let base_url = get_opt_str_arg(args, "base_url");
            let sub_uuid = subscriber_uuid(args, ctx.individual_tracking)?;

            let url_template = if base_url.trim().is_empty() {
                ctx.view_track_url.clone()
            } else {
                format!("{}/campaign/%s/%s/px.png", base_url.trim_end_matches('/'))
            };
            let pixel_url = fill_placeholders(
                &url_template,
                &[&ctx.campaign_uuid.to_string(), &sub_uuid.to_string()],
            );
            Ok(Value::String(format!(
                r#"<img src="{pixel_url}" width="1" height="1" alt="" />"#
            )))
        }
    });

    tera.register_function("unsubscribe_url", {
        let ctx = ctx.clone();
        move |args: &HashMap<String, Value>| -> TeraResult<Value> {
            let sub_uuid = subscriber_uuid(args, ctx.individual_tracking)?;
            Ok(Value::String(fill_placeholders(
                &ctx.unsub_url,
                &[&ctx.campaign_uuid.to_string(), &sub_uuid.to_string()],
            )))
        }
    });

    tera.register_function("optin_url", {
        let ctx = ctx.clone();
        move |args: &HashMap<String, Value>| -> TeraResult<Value> {
            let sub_uuid = subscriber_uuid(args, ctx.individual_tracking)?;
            let lists = match args.get("lists") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| format!("l={s}")))
                    .collect::<Vec<_>>()
                    .join("&"),
                _ => String::new(),
            };
            let base = fill_placeholders(&ctx.optin_url, &[&sub_uuid.to_string()]);
            let url = if lists.is_empty() {
                base
            } else if base.contains('?') {
                format!("{base}&{lists}")
            } else {
                format!("{base}?{lists}")
            };
            Ok(Value::String(url))
        }
    });

    tera.register_function("message_url", {
        let ctx = ctx.clone();
        move |args: &HashMap<String, Value>| -> TeraResult<Value> {
            let sub_uuid = subscriber_uuid(args, ctx.individual_tracking)?;
            Ok(Value::String(fill_placeholders(
                &ctx.message_url,
                &[&ctx.campaign_uuid.to_string(), &sub_uuid.to_string()],
            )))
        }
    });

    tera.register_function("now", |args: &HashMap<String, Value>| -> TeraResult<Value> {
        let layout = get_opt_str_arg(args, "layout");
        let layout = if layout.is_empty() { DEFAULT_DATE_LAYOUT } else { layout.as_str() };
        Ok(Value::String(chrono::Utc::now().format(layout).to_string()))
    });

    tera.register_filter("quote", |value: &Value, _args: &HashMap<String, Value>| -> TeraResult<Value> {
        let s = value.as_str().ok_or_else(|| tera::Error::msg("quote filter expects a string"))?;
        Ok(Value::String(format!("\"{s}\"")))
    });
}

/// `chrono::strftime` spelling of the classic C `asctime` layout
/// (`"Mon Jan _2 15:04:05 2006"`), used when a campaign template calls
/// `now()` with no explicit layout.
const DEFAULT_DATE_LAYOUT: &str = "%a %b %e %T %Y";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_positional_placeholders_in_order() {
        assert_eq!(
            fill_placeholders("/subscription/%s/%s", &["camp-uuid", "sub-uuid"]),
            "/subscription/camp-uuid/sub-uuid"
        );
    }

    #[test]
    fn missing_args_are_left_as_gaps() {
        assert_eq!(fill_placeholders("/x/%s/%s", &["only-one"]), "/x/only-one/");
    }
}
