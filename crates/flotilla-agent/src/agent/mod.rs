mod actor;
mod entrypoint;
mod event;
mod options;
mod server;
mod state;

pub(crate) use actor::{AgentActor, AgentActorOptions};
pub(crate) use event::AgentEvent;
pub(crate) use options::AgentOptions;

pub use entrypoint::run_agent;
