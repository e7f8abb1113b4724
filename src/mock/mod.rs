//! Mock build agents
//!
//! An in-process [`AgentPool`](gorelease_agent::AgentPool) whose agents keep
//! their work directory in memory and answer commands from scripted
//! handlers. Supports failure injection (agent creation, transport errors,
//! non-zero exits) and commands that block until cancelled.

mod agent;
mod fs;
mod go;
mod reply;
mod state;

pub use agent::{MockAgent, MockPool, MOCK_WORK_DIR};
pub use fs::{MockFs, MockNode};
pub use reply::{ExecCall, ExecHandler, MockRun, Reply};
use state::MockState;
