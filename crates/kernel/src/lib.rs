//! Host-facing probes for the router control plane: external tools, sysfs
//! and procfs readers, and parsers for their output.

pub mod command;
pub mod conntrack;
mod error;
pub mod link;
pub mod netdev;
pub mod sockets;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use error::Error;
