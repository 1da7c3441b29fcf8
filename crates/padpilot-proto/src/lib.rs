//! Data types shared between the mission core, the vehicle link and any observer
//! of the event stream.

pub mod mode;
pub mod telemetry;

pub use mode::MissionMode;
pub use telemetry::{EventRecord, MissionEvent, TelemetrySnapshot};
