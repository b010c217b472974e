//! Round scheduling: pairing table, pair rounds, group sessions, cadence.

pub mod cadence;
pub mod group;
pub mod pairing;
pub mod round;

pub use cadence::{CadenceConfig, CadenceDriver, CadencePhase, CadenceTransition, RoundPlan};
pub use group::GroupSessionController;
pub use pairing::{PairingSchedule, PersonaPair};
pub use round::{RoundContext, RoundRun, RoundScheduler};
