//! Campaign lifecycle state machine.
//!
//! Transitions allowed (see the engine's `manager`/`scheduler` for where
//! each is actually triggered):
//! draft -> scheduled -> running -> (paused <-> running) -> finished|cancelled
//! draft -> running (direct start), scheduled -> draft (unschedule).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Cancelled,
    Finished,
}

impl CampaignStatus {
    /// Terminal states never re-enter the active set.
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Cancelled | CampaignStatus::Finished)
    }

    /// Only these are candidates for admission into the active set
    /// (spec: "ripe" scheduled campaigns or already-running ones).
    pub fn is_dispatch_candidate(self) -> bool {
        matches!(self, CampaignStatus::Scheduled | CampaignStatus::Running)
    }

    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Running)
                | (Scheduled, Draft)
                | (Scheduled, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Running, Finished)
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}
