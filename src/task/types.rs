use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle states shared between the manager and its workers. Crosses the
/// wire as a small integer, so the variant order is part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum State {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl From<State> for u8 {
    fn from(state: State) -> u8 {
        match state {
            State::Pending => 0,
            State::Scheduled => 1,
            State::Running => 2,
            State::Completed => 3,
            State::Failed => 4,
        }
    }
}

impl TryFrom<u8> for State {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(State::Pending),
            1 => Ok(State::Scheduled),
            2 => Ok(State::Running),
            3 => Ok(State::Completed),
            4 => Ok(State::Failed),
            other => Err(format!("unknown task state {other}")),
        }
    }
}

/// One observed host-side binding of a container port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// A declared unit of containerized work. The manager owns the authoritative
/// record; workers hold derived copies that reconciliation merges back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub state: State,
    pub image: String,
    pub cpu: f64,
    pub memory: u64,
    pub disk: u64,
    pub exposed_ports: Vec<String>,
    pub host_ports: HashMap<String, Vec<PortBinding>>,
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(rename = "containerID")]
    pub container_id: Option<String>,
    pub health_check: String,
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            host_ports: HashMap::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
            container_id: None,
            health_check: String::new(),
            restart_count: 0,
        }
    }
}

/// An instruction or observation about a task: the state the emitter intends
/// the task to reach, plus the task configuration at the time of emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl Default for TaskEvent {
    fn default() -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state: State::Pending,
            timestamp: Utc::now(),
            task: Task::default(),
        }
    }
}

/// Container runtime configuration derived from a task.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        image: task.image.clone(),
        cpu: task.cpu,
        memory: task.memory as i64,
        disk: task.disk as i64,
        env: Vec::new(),
        exposed_ports: task.exposed_ports.clone(),
        restart_policy: task.restart_policy.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DockerError {
    #[error("docker client error: {0}")]
    Client(String),
    #[error("image pull error: {0}")]
    ImagePull(String),
    #[error("container creation error: {0}")]
    ContainerCreation(String),
    #[error("container start error: {0}")]
    ContainerStart(String),
    #[error("container stop error: {0}")]
    ContainerStop(String),
    #[error("container remove error: {0}")]
    ContainerRemove(String),
    #[error("container inspect error: {0}")]
    ContainerInspect(String),
}

/// Structured outcome of a container runtime call. A populated `error` means
/// the task that drove the call transitions to `Failed`.
#[derive(Debug, Default)]
pub struct DockerResult {
    pub action: Option<String>,
    pub container_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<DockerError>,
}

impl DockerResult {
    pub fn success(container_id: String, action: &str, result: &str) -> Self {
        DockerResult {
            container_id: Some(container_id),
            action: Some(action.to_string()),
            result: Some(result.to_string()),
            error: None,
        }
    }

    pub fn with_error(err: DockerError) -> Self {
        DockerResult {
            container_id: None,
            action: None,
            result: None,
            error: Some(err),
        }
    }
}
