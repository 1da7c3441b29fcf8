//! Mission control for vision-guided pad landing: the tick-driven state machine, the
//! recovery sequencer with its landing ladder, the event publisher and the tick runner.

pub mod config;
pub mod doctor;
pub mod error;
pub mod machine;
pub mod publisher;
pub mod recovery;
pub mod runner;
pub mod state;

pub use config::{MissionConfig, SettleDelays};
pub use error::MissionFault;
pub use machine::Mission;
pub use publisher::EventPublisher;
pub use recovery::{LandingOutcome, RecoveryReport, Rung};
pub use runner::{CancelToken, MissionRunner, RunOutcome};
pub use state::MissionState;
