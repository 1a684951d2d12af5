pub mod deadline;
pub mod monitor;

pub use deadline::{extract_deadline, DEADLINE_FIELDS};
pub use monitor::AlertMonitor;
