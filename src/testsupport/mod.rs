//! Test doubles for the engine's external contracts (spec.md §8). Kept
//! behind the `e2e-tests` feature so they never ship in a production
//! build, mirroring the teacher's own test-support module gating.

mod in_memory_data_source;
mod recording_notify_sink;
mod recording_transport;

pub use in_memory_data_source::{CampaignSeed, InMemoryDataSource};
pub use recording_notify_sink::{RecordedNotification, RecordingNotifySink};
pub use recording_transport::RecordingTransport;
