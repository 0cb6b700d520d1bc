use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AgentError, AgentResult};
use crate::gen;
use crate::id::{ExecutorId, FrameworkId, SlaveId, TaskId};
use crate::resources::{Resource, Resources, Value};

#[derive(Debug, Clone)]
pub struct SlaveInfo {
    pub hostname: String,
    pub public_hostname: String,
    pub resources: Resources,
    pub attributes: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub uri: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    /// The default executor used when a task does not carry its own.
    pub executor: ExecutorInfo,
}

#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub name: String,
    pub slave_id: SlaveId,
    pub resources: Resources,
    pub executor: Option<ExecutorInfo>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave_id: SlaveId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub executor_id: Option<ExecutorId>,
    pub slave_id: SlaveId,
    pub status: TaskStatus,
    pub timestamp: f64,
    /// Monotonically increasing per task; -1 is reserved for agent-synthesized
    /// updates about tasks the agent holds no executor for.
    pub sequence: i64,
}

#[derive(Debug, Clone)]
pub struct ExecutorArgs {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave_id: SlaveId,
    pub hostname: String,
    pub data: Vec<u8>,
}

pub(crate) fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl From<gen::messages::TaskState> for TaskState {
    fn from(value: gen::messages::TaskState) -> Self {
        match value {
            gen::messages::TaskState::TaskStarting => TaskState::Starting,
            gen::messages::TaskState::TaskRunning => TaskState::Running,
            gen::messages::TaskState::TaskFinished => TaskState::Finished,
            gen::messages::TaskState::TaskFailed => TaskState::Failed,
            gen::messages::TaskState::TaskKilled => TaskState::Killed,
            gen::messages::TaskState::TaskLost => TaskState::Lost,
        }
    }
}

impl From<TaskState> for gen::messages::TaskState {
    fn from(value: TaskState) -> Self {
        match value {
            TaskState::Starting => gen::messages::TaskState::TaskStarting,
            TaskState::Running => gen::messages::TaskState::TaskRunning,
            TaskState::Finished => gen::messages::TaskState::TaskFinished,
            TaskState::Failed => gen::messages::TaskState::TaskFailed,
            TaskState::Killed => gen::messages::TaskState::TaskKilled,
            TaskState::Lost => gen::messages::TaskState::TaskLost,
        }
    }
}

impl TryFrom<gen::messages::Resource> for Resource {
    type Error = AgentError;

    fn try_from(value: gen::messages::Resource) -> AgentResult<Self> {
        let gen::messages::Resource { name, value } = value;
        let value = match value {
            Some(gen::messages::resource::Value::Scalar(v)) => Value::Scalar(v),
            Some(gen::messages::resource::Value::Ranges(ranges)) => Value::Ranges(
                ranges
                    .range
                    .into_iter()
                    .map(|r| (r.begin, r.end))
                    .collect(),
            ),
            None => {
                return Err(AgentError::InvalidArgument(format!(
                    "resource '{name}' has no value"
                )))
            }
        };
        Ok(Resource { name, value })
    }
}

impl From<&Resource> for gen::messages::Resource {
    fn from(resource: &Resource) -> Self {
        let value = match &resource.value {
            Value::Scalar(v) => gen::messages::resource::Value::Scalar(*v),
            Value::Ranges(ranges) => {
                gen::messages::resource::Value::Ranges(gen::messages::Ranges {
                    range: ranges
                        .iter()
                        .map(|&(begin, end)| gen::messages::Range { begin, end })
                        .collect(),
                })
            }
        };
        gen::messages::Resource {
            name: resource.name.clone(),
            value: Some(value),
        }
    }
}

pub(crate) fn resources_try_from(values: Vec<gen::messages::Resource>) -> AgentResult<Resources> {
    let mut resources = Resources::new();
    for value in values {
        resources.push(Resource::try_from(value)?);
    }
    Ok(resources)
}

pub(crate) fn resources_into(resources: &Resources) -> Vec<gen::messages::Resource> {
    resources.iter().map(gen::messages::Resource::from).collect()
}

impl From<&SlaveInfo> for gen::messages::SlaveInfo {
    fn from(info: &SlaveInfo) -> Self {
        gen::messages::SlaveInfo {
            hostname: info.hostname.clone(),
            public_hostname: info.public_hostname.clone(),
            resources: resources_into(&info.resources),
            attributes: info.attributes.clone(),
        }
    }
}

impl TryFrom<gen::messages::ExecutorInfo> for ExecutorInfo {
    type Error = AgentError;

    fn try_from(value: gen::messages::ExecutorInfo) -> AgentResult<Self> {
        let gen::messages::ExecutorInfo {
            executor_id,
            uri,
            data,
        } = value;
        Ok(ExecutorInfo {
            executor_id: executor_id.into(),
            uri,
            data,
        })
    }
}

impl From<&ExecutorInfo> for gen::messages::ExecutorInfo {
    fn from(info: &ExecutorInfo) -> Self {
        gen::messages::ExecutorInfo {
            executor_id: info.executor_id.to_string(),
            uri: info.uri.clone(),
            data: info.data.clone(),
        }
    }
}

impl TryFrom<gen::messages::FrameworkInfo> for FrameworkInfo {
    type Error = AgentError;

    fn try_from(value: gen::messages::FrameworkInfo) -> AgentResult<Self> {
        let gen::messages::FrameworkInfo {
            name,
            user,
            executor,
        } = value;
        let executor = executor
            .ok_or_else(|| {
                AgentError::InvalidArgument("framework info has no default executor".to_string())
            })?
            .try_into()?;
        Ok(FrameworkInfo {
            name,
            user,
            executor,
        })
    }
}

impl From<&FrameworkInfo> for gen::messages::FrameworkInfo {
    fn from(info: &FrameworkInfo) -> Self {
        gen::messages::FrameworkInfo {
            name: info.name.clone(),
            user: info.user.clone(),
            executor: Some((&info.executor).into()),
        }
    }
}

impl TryFrom<gen::messages::TaskDescription> for TaskDescription {
    type Error = AgentError;

    fn try_from(value: gen::messages::TaskDescription) -> AgentResult<Self> {
        let gen::messages::TaskDescription {
            task_id,
            name,
            slave_id,
            resources,
            executor,
            data,
        } = value;
        Ok(TaskDescription {
            task_id: task_id.into(),
            name,
            slave_id: slave_id.into(),
            resources: resources_try_from(resources)?,
            executor: executor.map(|e| e.try_into()).transpose()?,
            data,
        })
    }
}

impl From<&TaskDescription> for gen::messages::TaskDescription {
    fn from(task: &TaskDescription) -> Self {
        gen::messages::TaskDescription {
            task_id: task.task_id.to_string(),
            name: task.name.clone(),
            slave_id: task.slave_id.to_string(),
            resources: resources_into(&task.resources),
            executor: task.executor.as_ref().map(|e| e.into()),
            data: task.data.clone(),
        }
    }
}

impl From<&Task> for gen::messages::Task {
    fn from(task: &Task) -> Self {
        gen::messages::Task {
            task_id: task.task_id.to_string(),
            framework_id: task.framework_id.to_string(),
            executor_id: task.executor_id.to_string(),
            slave_id: task.slave_id.to_string(),
            name: task.name.clone(),
            resources: resources_into(&task.resources),
            state: gen::messages::TaskState::from(task.state) as i32,
        }
    }
}

impl TryFrom<gen::messages::StatusUpdate> for StatusUpdate {
    type Error = AgentError;

    fn try_from(value: gen::messages::StatusUpdate) -> AgentResult<Self> {
        let gen::messages::StatusUpdate {
            framework_id,
            executor_id,
            slave_id,
            status,
            timestamp,
            sequence,
        } = value;
        let status = status.ok_or_else(|| {
            AgentError::InvalidArgument("status update has no task status".to_string())
        })?;
        let state = gen::messages::TaskState::try_from(status.state)
            .map_err(|_| {
                AgentError::InvalidArgument(format!("invalid task state: {}", status.state))
            })?
            .into();
        Ok(StatusUpdate {
            framework_id: framework_id.into(),
            executor_id: executor_id.map(ExecutorId::from),
            slave_id: slave_id.into(),
            status: TaskStatus {
                task_id: status.task_id.into(),
                state,
            },
            timestamp,
            sequence,
        })
    }
}

impl From<&StatusUpdate> for gen::messages::StatusUpdate {
    fn from(update: &StatusUpdate) -> Self {
        gen::messages::StatusUpdate {
            framework_id: update.framework_id.to_string(),
            executor_id: update.executor_id.as_ref().map(|e| e.to_string()),
            slave_id: update.slave_id.to_string(),
            status: Some(gen::messages::TaskStatus {
                task_id: update.status.task_id.to_string(),
                state: gen::messages::TaskState::from(update.status.state) as i32,
            }),
            timestamp: update.timestamp,
            sequence: update.sequence,
        }
    }
}

impl From<&ExecutorArgs> for gen::executor::ExecutorArgs {
    fn from(args: &ExecutorArgs) -> Self {
        gen::executor::ExecutorArgs {
            framework_id: args.framework_id.to_string(),
            executor_id: args.executor_id.to_string(),
            slave_id: args.slave_id.to_string(),
            hostname: args.hostname.clone(),
            data: args.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Starting.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }

    #[test]
    fn test_status_update_conversion_requires_status() {
        let value = gen::messages::StatusUpdate {
            framework_id: "f1".to_string(),
            executor_id: None,
            slave_id: "s1".to_string(),
            status: None,
            timestamp: 0.0,
            sequence: 0,
        };
        assert!(StatusUpdate::try_from(value).is_err());
    }
}
