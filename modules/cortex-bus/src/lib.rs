pub mod bus;
pub mod mirror;

pub use bus::{BusHandler, EventBus};
pub use mirror::{Mirror, NoopMirror, RedisMirror};
