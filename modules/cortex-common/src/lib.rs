pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod normalize;
pub mod seen;
pub mod types;

pub use backoff::RetryPolicy;
pub use config::Config;
pub use error::{CortexError, CortexResult};
pub use events::{BusEvent, PipelineEvent, Topic};
pub use seen::SeenEvents;
pub use types::*;
