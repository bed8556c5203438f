//! Worker supervision subsystem: command resolution, the single-slot
//! supervisor, and the log-tailing progress monitor.

pub mod command;
pub mod monitor;
pub mod stage;
pub mod supervisor;

pub use monitor::{ProgressMonitor, RunOutcome, RunVerdict};
pub use stage::Stage;
pub use supervisor::{StopOutcome, Supervisor, TriggerOutcome};
