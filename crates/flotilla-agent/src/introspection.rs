use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use flotilla_server::actor::ActorHandle;
use log::{error, info};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::agent::{AgentActor, AgentEvent};

pub const BUILD_DATE: &str = match option_env!("FLOTILLA_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};
pub const BUILD_USER: &str = match option_env!("FLOTILLA_BUILD_USER") {
    Some(user) => user,
    None => "unknown",
};
pub const BUILD_FLAGS: &str = match option_env!("FLOTILLA_BUILD_FLAGS") {
    Some(flags) => flags,
    None => "",
};

/// A read-only copy of the actor state, produced inside a single handler
/// invocation so it is always consistent with the data-model invariants.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub info: InfoSnapshot,
    pub frameworks: Vec<FrameworkSnapshot>,
    pub tasks: Vec<TaskSnapshot>,
    pub stats: StatsSnapshot,
    #[serde(skip)]
    pub vars: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoSnapshot {
    pub built_date: String,
    pub build_user: String,
    pub start_time: f64,
    pub pid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkSnapshot {
    pub id: String,
    pub name: String,
    pub user: String,
    #[serde(skip)]
    pub executors: Vec<ExecutorSnapshot>,
    #[serde(skip)]
    pub pending_updates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorSnapshot {
    pub id: String,
    pub pid: Option<String>,
    pub directory: String,
    pub resources: String,
    pub queued_tasks: Vec<String>,
    pub launched_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub framework_id: String,
    pub slave_id: String,
    pub name: String,
    pub state: String,
    pub cpus: f64,
    pub mem: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime: f64,
    pub total_frameworks: usize,
    pub started_tasks: u64,
    pub finished_tasks: u64,
    pub killed_tasks: u64,
    pub failed_tasks: u64,
    pub lost_tasks: u64,
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
}

pub async fn serve(handle: ActorHandle<AgentActor>, listener: TcpListener) {
    let app = router(handle);
    if let Err(e) = axum::serve(listener, app).await {
        error!("introspection server failed: {e}");
    }
}

fn router(handle: ActorHandle<AgentActor>) -> Router {
    Router::new()
        .route("/info.json", get(info_json))
        .route("/frameworks.json", get(frameworks_json))
        .route("/tasks.json", get(tasks_json))
        .route("/stats.json", get(stats_json))
        .route("/vars", get(vars))
        .with_state(handle)
}

async fn snapshot(handle: &ActorHandle<AgentActor>) -> Result<AgentSnapshot, StatusCode> {
    let (tx, rx) = oneshot::channel();
    handle
        .send(AgentEvent::GetSnapshot { result: tx })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn info_json(
    State(handle): State<ActorHandle<AgentActor>>,
) -> Result<Json<InfoSnapshot>, StatusCode> {
    info!("HTTP request for '/info.json'");
    Ok(Json(snapshot(&handle).await?.info))
}

async fn frameworks_json(
    State(handle): State<ActorHandle<AgentActor>>,
) -> Result<Json<Vec<FrameworkSnapshot>>, StatusCode> {
    info!("HTTP request for '/frameworks.json'");
    Ok(Json(snapshot(&handle).await?.frameworks))
}

async fn tasks_json(
    State(handle): State<ActorHandle<AgentActor>>,
) -> Result<Json<Vec<TaskSnapshot>>, StatusCode> {
    info!("HTTP request for '/tasks.json'");
    Ok(Json(snapshot(&handle).await?.tasks))
}

async fn stats_json(
    State(handle): State<ActorHandle<AgentActor>>,
) -> Result<Json<StatsSnapshot>, StatusCode> {
    info!("HTTP request for '/stats.json'");
    Ok(Json(snapshot(&handle).await?.stats))
}

async fn vars(State(handle): State<ActorHandle<AgentActor>>) -> Result<String, StatusCode> {
    info!("HTTP request for '/vars'");
    let snapshot = snapshot(&handle).await?;
    let mut out = String::new();
    out.push_str(&format!("build_date {BUILD_DATE}\n"));
    out.push_str(&format!("build_user {BUILD_USER}\n"));
    out.push_str(&format!("build_flags {BUILD_FLAGS}\n"));
    for (key, value) in &snapshot.vars {
        out.push_str(&format!("{key} {value}\n"));
    }
    let stats = &snapshot.stats;
    out.push_str(&format!("uptime {}\n", stats.uptime));
    out.push_str(&format!("total_frameworks {}\n", stats.total_frameworks));
    out.push_str(&format!("started_tasks {}\n", stats.started_tasks));
    out.push_str(&format!("finished_tasks {}\n", stats.finished_tasks));
    out.push_str(&format!("killed_tasks {}\n", stats.killed_tasks));
    out.push_str(&format!("failed_tasks {}\n", stats.failed_tasks));
    out.push_str(&format!("lost_tasks {}\n", stats.lost_tasks));
    out.push_str(&format!("valid_status_updates {}\n", stats.valid_status_updates));
    out.push_str(&format!("invalid_status_updates {}\n", stats.invalid_status_updates));
    out.push_str(&format!("valid_framework_messages {}\n", stats.valid_framework_messages));
    out.push_str(&format!(
        "invalid_framework_messages {}\n",
        stats.invalid_framework_messages
    ));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot_keys() {
        let stats = StatsSnapshot {
            uptime: 1.5,
            total_frameworks: 2,
            started_tasks: 3,
            finished_tasks: 1,
            killed_tasks: 0,
            failed_tasks: 0,
            lost_tasks: 0,
            valid_status_updates: 4,
            invalid_status_updates: 0,
            valid_framework_messages: 0,
            invalid_framework_messages: 0,
        };
        let value = serde_json::to_value(&stats).unwrap();
        for key in [
            "uptime",
            "total_frameworks",
            "started_tasks",
            "finished_tasks",
            "killed_tasks",
            "failed_tasks",
            "lost_tasks",
            "valid_status_updates",
            "invalid_status_updates",
            "valid_framework_messages",
            "invalid_framework_messages",
        ] {
            assert!(value.get(key).is_some(), "missing key: {key}");
        }
    }

    #[test]
    fn test_framework_snapshot_serializes_summary_fields_only() {
        let framework = FrameworkSnapshot {
            id: "f1".to_string(),
            name: "analytics".to_string(),
            user: "nobody".to_string(),
            executors: vec![],
            pending_updates: vec![],
        };
        let value = serde_json::to_value(&framework).unwrap();
        assert_eq!(value["id"], "f1");
        assert_eq!(value["name"], "analytics");
        assert_eq!(value["user"], "nobody");
        assert!(value.get("executors").is_none());
    }

    #[test]
    fn test_empty_collections_serialize_as_arrays() {
        let tasks: Vec<TaskSnapshot> = vec![];
        assert_eq!(serde_json::to_string(&tasks).unwrap(), "[]");
    }
}
