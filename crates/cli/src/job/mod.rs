//! In-allocation job body and the job spec that launches it.

mod body;
mod log_path;
mod shutdown;
mod spec;

pub use body::{JobBody, JobBodyConfig, JobOutcome, JobPhase};
pub use log_path::{LogPathVars, realize_log_path};
pub use shutdown::{ShutdownReason, ShutdownSignals};
pub use spec::{PREEMPTION_SIGNAL, job_spec};
