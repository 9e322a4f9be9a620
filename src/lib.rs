pub mod configuration;
pub mod domain;
pub mod engine;
pub mod telemetry;
pub mod transports;

/// Test doubles (`InMemoryDataSource`, `RecordingTransport`, ...) used by
/// `tests/engine_scenarios.rs`. Kept out of ordinary builds.
#[cfg(feature = "e2e-tests")]
pub mod testsupport;
