pub mod state;
pub mod workflow;

pub use state::{RedemptionOutcome, RedemptionStatus, StatusTone};
pub use workflow::RedemptionWorkflow;
