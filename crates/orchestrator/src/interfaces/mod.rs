#![forbid(unsafe_code)]

mod actions;
mod manager;
mod probe;
mod role;

pub use actions::{NetworkActions, SystemNetworkActions};
pub use manager::{InterfaceOrchestrator, Plan, decide};
pub use probe::{InterfaceProbe, SystemProbe};
pub use role::{InterfaceRecord, Role};
