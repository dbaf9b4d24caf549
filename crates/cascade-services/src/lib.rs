//! cascade-services — the round coordinator and its collaborators.

pub mod config_source;
pub mod coordinator;
pub mod executor;
pub mod hub;
pub mod intake;
pub mod lifecycle;
pub mod mixnet;
pub mod negotiator;
pub mod persist;

pub use config_source::{ConfigSource, StaticConfigSource};
pub use coordinator::{Coordinator, CoordinatorDeps, CoordinatorError, CoordinatorStatus};
pub use executor::{DispatchReport, MixExecutor};
pub use hub::{ChannelConnection, ConnId, Connection, Hub, Inbound, SendError};
pub use intake::{OnionIntake, Submission, SubmitOutcome};
pub use lifecycle::{Phase, Shutdown, ShutdownListener};
pub use mixnet::{HttpMixChain, MixChain, MixnetError};
pub use negotiator::RoundSettingsNegotiator;
pub use persist::{FileStateStore, PersistError, StateStore};
