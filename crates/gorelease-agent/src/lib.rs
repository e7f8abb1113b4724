//! Build agent interface for gorelease
//!
//! The release pipeline drives ephemeral build machines through the
//! [`BuildAgent`] trait: push trees, run commands, fetch trees back. Agents
//! are obtained from an [`AgentPool`] keyed by builder name. [`LocalAgent`]
//! implements the protocol with child processes in a private temporary
//! directory on this machine.

mod agent;
mod cancel;
mod error;
mod local;

pub use agent::{AgentPool, BuildAgent, ExecOptions, RemoteOutcome};
pub use cancel::CancelToken;
pub use error::AgentError;
pub use local::{LocalAgent, LocalPool};
