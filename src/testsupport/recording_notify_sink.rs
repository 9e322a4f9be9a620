//! A `NotifySink` test double that records every admin notification it
//! receives, for asserting on campaign-exhaustion reasons in scenario tests.

use crate::engine::{NotificationPayload, NotifySink};
use std::sync::Mutex;

#[derive(Clone)]
pub struct RecordedNotification {
    pub subject: String,
    pub payload: NotificationPayload,
}

pub struct RecordingNotifySink {
    notifications: Mutex<Vec<RecordedNotification>>,
}

impl RecordingNotifySink {
    pub fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Default for RecordingNotifySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NotifySink for RecordingNotifySink {
    async fn notify(&self, subject: &str, payload: NotificationPayload) -> Result<(), anyhow::Error> {
        self.notifications.lock().unwrap().push(RecordedNotification {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}
