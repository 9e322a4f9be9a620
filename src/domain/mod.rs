mod campaign_status;
mod content_type;
mod subscriber_email_address;
mod subscriber_name;

pub use campaign_status::CampaignStatus;
pub use content_type::ContentType;
pub use subscriber_email_address::SubscriberEmailAddress;
pub use subscriber_name::SubscriberName;
