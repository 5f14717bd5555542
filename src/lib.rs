pub mod agent_state;
pub mod census;
pub mod contact;
pub mod grid;
pub mod movement;
pub mod recorder;
pub mod replay;
pub mod scheduler;
pub mod seir;
pub mod simulation;

#[cfg(test)]
mod test_support;

pub use agent_state::AgentState;
pub use census::{CensusObserver, PopulationCensus};
pub use contact::{ContactInput, ContactTracer, DispatchError, HostContactTracer, ParallelContactKernel};
pub use grid::SpatialGrid;
pub use recorder::{ChangeError, ChangeRecorder, ConfigChange, Recording};
pub use replay::{RecordingHistory, SessionManager};
pub use scheduler::{FixedStepScheduler, TickEvent};
pub use seir::SeirStateMachine;
pub use simulation::{EpidemicSimulation, TickReport};
