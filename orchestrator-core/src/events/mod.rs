//! Progress event stream: the wire shape consumed by dashboards/UIs and
//! the in-process broadcast bus that feeds it (spec §6).

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, SharedEventBus};
pub use types::{ProgressCallback, ProgressEvent};
