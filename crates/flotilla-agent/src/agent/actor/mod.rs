mod core;
mod handler;
mod rpc;

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::agent::options::AgentOptions;
use crate::agent::state::Registry;
use crate::id::{Pid, SlaveId};
use crate::isolation::{IsolationDispatcher, IsolationModule};
use crate::protocol::SlaveInfo;
use crate::rpc::ServerMonitor;
use crate::stats::AgentStats;
use crate::transport::{Outbox, Transport};

pub struct AgentActorOptions {
    pub options: AgentOptions,
    pub transport: Arc<dyn Transport>,
    pub isolation: Arc<dyn IsolationModule>,
}

pub struct AgentActor {
    options: AgentOptions,
    server: ServerMonitor,
    outbox: Outbox,
    isolation: IsolationDispatcher,
    info: SlaveInfo,
    /// Assigned by the master on first registration; stable across master
    /// failover.
    slave_id: Option<SlaveId>,
    master: Option<Pid>,
    /// The externally reachable address of this agent, known once the server
    /// has bound its listener.
    advertised: Option<Pid>,
    registry: Registry,
    stats: AgentStats,
    started_at: SystemTime,
    start_instant: Instant,
}
