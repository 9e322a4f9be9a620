use crate::domain::{SubscriberEmailAddress, SubscriberName};
use uuid::Uuid;

/// A read-only view of a mailing-list subscriber as the engine sees it.
///
/// The engine never mutates a subscriber itself; `attribs` is opaque JSON
/// handed straight to the template context.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: i64,
    pub uuid: Uuid,
    pub email: SubscriberEmailAddress,
    pub name: SubscriberName,
    pub attribs: serde_json::Value,
    pub status: String,
}
