use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use log::warn;

use crate::id::{ExecutorId, FrameworkId, Pid, TaskId};
use crate::protocol::{
    ExecutorInfo, FrameworkInfo, StatusUpdate, Task, TaskDescription, TaskState,
};
use crate::resources::Resources;

/// All frameworks known to the agent, keyed by framework id.
#[derive(Debug, Default)]
pub struct Registry {
    frameworks: HashMap<FrameworkId, Framework>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.get(id)
    }

    pub fn get_mut(&mut self, id: &FrameworkId) -> Option<&mut Framework> {
        self.frameworks.get_mut(id)
    }

    pub fn insert(&mut self, framework: Framework) {
        self.frameworks.insert(framework.id.clone(), framework);
    }

    pub fn remove(&mut self, id: &FrameworkId) -> Option<Framework> {
        self.frameworks.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Framework> {
        self.frameworks.values()
    }

    pub fn ids(&self) -> Vec<FrameworkId> {
        self.frameworks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frameworks.len()
    }
}

/// A tenant with at least one executor on this agent. Created lazily by the
/// first task assignment and destroyed when its last executor goes away.
#[derive(Debug)]
pub struct Framework {
    pub id: FrameworkId,
    pub info: FrameworkInfo,
    /// The scheduler address; updated when the scheduler relocates.
    pub pid: Pid,
    pub executors: HashMap<ExecutorId, Executor>,
    /// Reliable status updates awaiting master acknowledgement, by task.
    pub updates: HashMap<TaskId, StatusUpdate>,
}

impl Framework {
    pub fn new(id: FrameworkId, info: FrameworkInfo, pid: Pid) -> Self {
        Self {
            id,
            info,
            pid,
            executors: HashMap::new(),
            updates: HashMap::new(),
        }
    }

    pub fn create_executor(&mut self, info: ExecutorInfo, directory: PathBuf) -> &mut Executor {
        let executor = Executor::new(self.id.clone(), info, directory);
        self.executors
            .entry(executor.id.clone())
            .or_insert(executor)
    }

    /// Find the executor that tracks a task, searching both the queued and the
    /// launched tables.
    pub fn executor_id_for_task(&self, task_id: &TaskId) -> Option<ExecutorId> {
        self.executors
            .values()
            .find(|executor| executor.contains_task(task_id))
            .map(|executor| executor.id.clone())
    }
}

/// A framework-supplied process hosting tasks. The `pid` stays empty until
/// the executor registers; while it is empty, assigned tasks wait in
/// `queued_tasks` and no resources are charged for them.
#[derive(Debug)]
pub struct Executor {
    pub id: ExecutorId,
    pub framework_id: FrameworkId,
    pub info: ExecutorInfo,
    pub directory: PathBuf,
    pub pid: Option<Pid>,
    /// Sum of the resources of all launched tasks.
    pub resources: Resources,
    pub queued_tasks: IndexMap<TaskId, TaskDescription>,
    pub launched_tasks: HashMap<TaskId, Task>,
}

impl Executor {
    pub fn new(framework_id: FrameworkId, info: ExecutorInfo, directory: PathBuf) -> Self {
        Self {
            id: info.executor_id.clone(),
            framework_id,
            info,
            directory,
            pid: None,
            resources: Resources::new(),
            queued_tasks: IndexMap::new(),
            launched_tasks: HashMap::new(),
        }
    }

    /// Move a task into the launched table and charge its resources.
    pub fn add_task(&mut self, task: TaskDescription) {
        if self.launched_tasks.contains_key(&task.task_id) {
            // The master enforces unique task ids; an offender is dropped
            // rather than double-charged.
            warn!("task {} is already launched", task.task_id);
            return;
        }
        self.resources += &task.resources;
        self.launched_tasks.insert(
            task.task_id.clone(),
            Task {
                task_id: task.task_id.clone(),
                framework_id: self.framework_id.clone(),
                executor_id: self.id.clone(),
                slave_id: task.slave_id,
                name: task.name,
                resources: task.resources,
                state: TaskState::Starting,
            },
        );
    }

    /// Remove a task wherever it currently lives. Resources are released only
    /// for launched tasks since queued tasks were never charged.
    pub fn remove_task(&mut self, task_id: &TaskId) {
        self.queued_tasks.shift_remove(task_id);
        if let Some(task) = self.launched_tasks.remove(task_id) {
            self.resources -= &task.resources;
        }
    }

    pub fn update_task_state(&mut self, task_id: &TaskId, state: TaskState) {
        if let Some(task) = self.launched_tasks.get_mut(task_id) {
            task.state = state;
        }
    }

    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.queued_tasks.contains_key(task_id) || self.launched_tasks.contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_info(id: &str) -> ExecutorInfo {
        ExecutorInfo {
            executor_id: id.into(),
            uri: "/usr/libexec/test-executor".to_string(),
            data: vec![],
        }
    }

    fn framework() -> Framework {
        Framework::new(
            "f1".into(),
            FrameworkInfo {
                name: "analytics".to_string(),
                user: "nobody".to_string(),
                executor: executor_info("default"),
            },
            "scheduler:9090".parse().unwrap(),
        )
    }

    fn task(id: &str, resources: &str) -> TaskDescription {
        TaskDescription {
            task_id: id.into(),
            name: format!("task {id}"),
            slave_id: "s1".into(),
            resources: Resources::parse(resources).unwrap(),
            executor: None,
            data: vec![],
        }
    }

    #[test]
    fn test_add_task_charges_resources() {
        let mut framework = framework();
        let executor = framework.create_executor(executor_info("e1"), PathBuf::from("/tmp/e1"));
        executor.add_task(task("t1", "cpus:1;mem:256"));
        executor.add_task(task("t2", "cpus:1;mem:256"));
        assert_eq!(executor.resources, Resources::parse("cpus:2;mem:512").unwrap());
        assert_eq!(executor.launched_tasks.len(), 2);
    }

    #[test]
    fn test_duplicate_launch_is_dropped() {
        let mut framework = framework();
        let executor = framework.create_executor(executor_info("e1"), PathBuf::from("/tmp/e1"));
        executor.add_task(task("t1", "cpus:1;mem:256"));
        executor.add_task(task("t1", "cpus:1;mem:256"));
        assert_eq!(executor.resources, Resources::parse("cpus:1;mem:256").unwrap());
    }

    #[test]
    fn test_remove_task_releases_launched_resources_only() {
        let mut framework = framework();
        let executor = framework.create_executor(executor_info("e1"), PathBuf::from("/tmp/e1"));
        executor
            .queued_tasks
            .insert("t1".into(), task("t1", "cpus:1;mem:256"));
        executor.add_task(task("t2", "cpus:1;mem:256"));

        executor.remove_task(&"t1".into());
        assert_eq!(executor.resources, Resources::parse("cpus:1;mem:256").unwrap());
        assert!(executor.queued_tasks.is_empty());

        executor.remove_task(&"t2".into());
        assert!(executor.resources.is_empty());
        assert!(executor.launched_tasks.is_empty());
    }

    #[test]
    fn test_task_lives_in_exactly_one_table() {
        let mut framework = framework();
        let executor = framework.create_executor(executor_info("e1"), PathBuf::from("/tmp/e1"));
        let description = task("t1", "cpus:1;mem:256");
        executor
            .queued_tasks
            .insert(description.task_id.clone(), description.clone());

        // Draining the queue moves the task over in one step.
        let queued = executor.queued_tasks.shift_remove(&description.task_id);
        executor.add_task(queued.unwrap());
        assert!(!executor.queued_tasks.contains_key(&description.task_id));
        assert!(executor.launched_tasks.contains_key(&description.task_id));
    }

    #[test]
    fn test_executor_lookup_by_task() {
        let mut framework = framework();
        framework
            .create_executor(executor_info("e1"), PathBuf::from("/tmp/e1"))
            .queued_tasks
            .insert("t1".into(), task("t1", "cpus:1"));
        framework
            .create_executor(executor_info("e2"), PathBuf::from("/tmp/e2"))
            .add_task(task("t2", "cpus:1"));

        assert_eq!(framework.executor_id_for_task(&"t1".into()), Some("e1".into()));
        assert_eq!(framework.executor_id_for_task(&"t2".into()), Some("e2".into()));
        assert_eq!(framework.executor_id_for_task(&"t3".into()), None);
    }
}
