use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::node::Node;
use crate::scheduler::Scheduler;
use crate::store::{InMemoryStore, PersistentStore, Store, StoreError};
use crate::task::{
    state::valid_state_transition,
    types::{PortBinding, State, Task, TaskEvent},
};
use crate::worker::api::ErrResponse;
use crate::worker::stats::Stats;

/// A task may be restarted at most this many times before it is left in
/// Failed for good.
const RESTART_BUDGET: u32 = 3;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no candidate workers match the resource request for task {0}")]
    NoCandidates(Uuid),
    #[error("worker request failed")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response from worker {worker}: status {status}")]
    WorkerResponse { worker: String, status: u16 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The control plane: accepts task events, dispatches them to workers via
/// the scheduler, reconciles worker-reported state, and drives restarts.
/// All fields are mutated only with the manager lock held; the dispatch,
/// reconciliation, and health loops each take the lock for a full iteration
/// so scheduling stays consistent with node bookkeeping.
pub struct Manager {
    pub pending: VecDeque<TaskEvent>,
    pub task_db: Box<dyn Store<Task>>,
    pub event_db: Box<dyn Store<TaskEvent>>,
    pub workers: Vec<String>,
    pub worker_task_map: HashMap<String, Vec<Uuid>>,
    pub task_worker_map: HashMap<Uuid, String>,
    pub worker_nodes: Vec<Node>,
    pub scheduler: Scheduler,
    http: reqwest::Client,
}

impl Manager {
    pub fn new(
        workers: Vec<String>,
        scheduler_name: &str,
        store_backend: &str,
    ) -> Result<Manager, ManagerError> {
        let mut worker_task_map = HashMap::new();
        let mut worker_nodes = Vec::new();
        for worker in &workers {
            worker_task_map.insert(worker.clone(), Vec::new());
            let api = format!("http://{worker}");
            worker_nodes.push(Node::new(worker, &api, "worker"));
        }

        let (task_db, event_db): (Box<dyn Store<Task>>, Box<dyn Store<TaskEvent>>) =
            match store_backend {
                "persistent" => (
                    Box::new(PersistentStore::new("tasks.db", "tasks")?),
                    Box::new(PersistentStore::new("events.db", "events")?),
                ),
                "memory" => (Box::new(InMemoryStore::new()), Box::new(InMemoryStore::new())),
                other => {
                    warn!(store = %other, "unknown store backend, defaulting to memory");
                    (Box::new(InMemoryStore::new()), Box::new(InMemoryStore::new()))
                }
            };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Manager {
            pending: VecDeque::new(),
            task_db,
            event_db,
            workers,
            worker_task_map,
            task_worker_map: HashMap::new(),
            worker_nodes,
            scheduler: Scheduler::from_name(scheduler_name),
            http,
        })
    }

    pub fn add_task(&mut self, te: TaskEvent) {
        self.pending.push_back(te);
    }

    pub fn get_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.task_db.list()
    }

    pub fn select_worker(&mut self, task: &Task) -> Result<Node, ManagerError> {
        let candidates = self.scheduler.select_candidate_nodes(task, &self.worker_nodes);
        if candidates.is_empty() {
            return Err(ManagerError::NoCandidates(task.id));
        }
        let scores = self.scheduler.score(task, &candidates);
        self.scheduler
            .pick(&scores, &candidates)
            .ok_or(ManagerError::NoCandidates(task.id))
    }

    /// Dispatch one pending event. Runs once per tick, so throughput tops
    /// out at one event per tick; that bound is deliberate.
    pub async fn send_work(&mut self) {
        let Some(te) = self.pending.pop_front() else {
            debug!("no work in the queue");
            return;
        };

        if let Err(e) = self.event_db.put(&te.id.to_string(), te.clone()) {
            error!(event = %te.id, error = %e, "failed to store task event, requeueing");
            self.pending.push_back(te);
            return;
        }
        info!(event = %te.id, task = %te.task.id, "pulled event off pending queue");

        // A task that already has a worker makes this a control event.
        if let Some(worker) = self.task_worker_map.get(&te.task.id).cloned() {
            let persisted = match self.task_db.get(&te.task.id.to_string()) {
                Ok(task) => task,
                Err(e) => {
                    error!(task = %te.task.id, error = %e, "unable to schedule task");
                    return;
                }
            };

            if te.state == State::Completed
                && valid_state_transition(&persisted.state, &te.state)
            {
                self.stop_task(&worker, &te.task.id.to_string()).await;
                self.unassign(&te.task.id, &worker);
            } else {
                warn!(
                    task = %persisted.id,
                    state = ?persisted.state,
                    requested = ?te.state,
                    "invalid control event, dropping"
                );
            }
            return;
        }

        let mut task = te.task.clone();
        let node = match self.select_worker(&task) {
            Ok(node) => node,
            Err(e) => {
                warn!(task = %task.id, error = %e, "no candidates for task, requeueing");
                task.state = State::Scheduled;
                if let Err(e) = self.task_db.put(&task.id.to_string(), task.clone()) {
                    error!(task = %task.id, error = %e, "failed to persist task");
                }
                self.pending.push_back(te);
                return;
            }
        };
        info!(worker = %node.name, task = %task.id, "selected worker for task");

        self.worker_task_map
            .entry(node.name.clone())
            .or_default()
            .push(task.id);
        self.task_worker_map.insert(task.id, node.name.clone());

        task.state = State::Scheduled;
        if let Err(e) = self.task_db.put(&task.id.to_string(), task.clone()) {
            error!(task = %task.id, error = %e, "failed to persist task, requeueing");
            self.unassign(&task.id, &node.name);
            self.pending.push_back(te);
            return;
        }

        let mut wire_event = te.clone();
        wire_event.task = task.clone();

        let url = format!("http://{}/tasks", node.name);
        let resp = match self.http.post(&url).json(&wire_event).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(worker = %node.name, error = %e, "error connecting to worker, requeueing");
                self.unassign(&task.id, &node.name);
                self.pending.push_back(wire_event);
                return;
            }
        };

        if resp.status() != reqwest::StatusCode::CREATED {
            match resp.json::<ErrResponse>().await {
                Ok(err) => warn!(
                    status = err.http_status_code,
                    message = %err.message,
                    "worker rejected task"
                ),
                Err(e) => error!(error = %e, "error decoding response"),
            }
            return;
        }

        match resp.json::<Task>().await {
            Ok(returned) => {
                info!(task = %returned.id, worker = %node.name, "received response from worker");
                if let Some(n) = self.worker_nodes.iter_mut().find(|n| n.name == node.name) {
                    n.task_count += 1;
                    n.memory_allocated += task.memory;
                    n.disk_allocated += task.disk;
                }
            }
            Err(e) => error!(error = %e, "error decoding response"),
        }
    }

    fn unassign(&mut self, task_id: &Uuid, worker: &str) {
        if let Some(tasks) = self.worker_task_map.get_mut(worker) {
            tasks.retain(|id| id != task_id);
        }
        self.task_worker_map.remove(task_id);
    }

    /// One reconciliation pass: refresh node stats, pull every worker's task
    /// list, and merge what they report into the authoritative store.
    pub async fn update_tasks(&mut self) {
        for worker in self.workers.clone() {
            debug!(%worker, "checking worker for task updates");
            self.update_node_stats(&worker).await;

            let url = format!("http://{worker}/tasks");
            let resp = match self.http.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(%worker, error = %e, "error connecting to worker");
                    continue;
                }
            };
            if !resp.status().is_success() {
                error!(%worker, status = %resp.status(), "error requesting task updates");
                continue;
            }
            let tasks: Vec<Task> = match resp.json().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(%worker, error = %e, "error unmarshalling tasks");
                    continue;
                }
            };

            for observed in tasks {
                self.merge_observed(observed);
            }
        }

        self.recalculate_allocations();
    }

    /// Merge one worker-reported task into the store. State moves only along
    /// legal edges; start/finish times, container id, and host ports are
    /// observations and overwrite unconditionally.
    pub fn merge_observed(&mut self, observed: Task) {
        let key = observed.id.to_string();
        let persisted = match self.task_db.get(&key) {
            Ok(task) => task,
            Err(_) => {
                warn!(task = %observed.id, "worker reported unknown task, skipping");
                return;
            }
        };

        let mut updated = persisted.clone();
        if persisted.state != observed.state {
            if valid_state_transition(&persisted.state, &observed.state) {
                updated.state = observed.state;
            } else {
                warn!(
                    task = %observed.id,
                    from = ?persisted.state,
                    to = ?observed.state,
                    "dropping illegal observed transition"
                );
            }
        }

        updated.start_time = observed.start_time;
        updated.finish_time = observed.finish_time;
        updated.container_id = observed.container_id.clone();
        updated.host_ports = observed.host_ports;

        if let Err(e) = self.task_db.put(&key, updated) {
            error!(task = %observed.id, error = %e, "failed to persist observed update");
        }
    }

    async fn update_node_stats(&mut self, worker: &str) {
        let url = format!("http://{worker}/stats");
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Stats>().await {
                Ok(stats) => {
                    if let Some(node) = self.worker_nodes.iter_mut().find(|n| n.name == worker) {
                        node.memory = stats.memory_total;
                        node.disk = stats.disk_total;
                        node.task_count = stats.task_count;
                        node.stats = stats;
                    }
                }
                Err(e) => warn!(%worker, error = %e, "error unmarshalling stats"),
            },
            Ok(resp) => warn!(%worker, status = %resp.status(), "error requesting stats"),
            Err(e) => warn!(%worker, error = %e, "error connecting to worker for stats"),
        }
    }

    /// Rebuild per-node allocation totals from tasks currently Scheduled or
    /// Running on each node.
    pub fn recalculate_allocations(&mut self) {
        let mut totals: HashMap<String, (u64, u64)> = HashMap::new();
        for (task_id, worker) in &self.task_worker_map {
            let Ok(task) = self.task_db.get(&task_id.to_string()) else {
                continue;
            };
            if matches!(task.state, State::Scheduled | State::Running) {
                let entry = totals.entry(worker.clone()).or_insert((0, 0));
                entry.0 += task.memory;
                entry.1 += task.disk;
            }
        }

        for node in &mut self.worker_nodes {
            let (memory, disk) = totals.get(&node.name).copied().unwrap_or((0, 0));
            node.memory_allocated = memory;
            node.disk_allocated = disk;
        }
    }

    pub async fn do_health_checks(&mut self) {
        let tasks = match self.get_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "error listing tasks for health checks");
                return;
            }
        };

        for task in tasks {
            if task.state == State::Running && task.restart_count < RESTART_BUDGET {
                if self.check_task_health(&task).await.is_err() {
                    self.restart_task(&task).await;
                }
            } else if task.state == State::Failed && task.restart_count < RESTART_BUDGET {
                self.restart_task(&task).await;
            }
        }
    }

    /// Probe the task's health endpoint through its observed host port.
    /// Tasks whose ports are not collected yet pass by default.
    async fn check_task_health(&self, task: &Task) -> Result<(), ManagerError> {
        let Some(worker) = self.task_worker_map.get(&task.id) else {
            debug!(task = %task.id, "task has no assigned worker, skipping health check");
            return Ok(());
        };
        let Some(host_port) = get_host_port(&task.host_ports) else {
            debug!(task = %task.id, "host port not collected yet, skipping health check");
            return Ok(());
        };

        let host = worker.split(':').next().unwrap_or_default();
        let url = format!("http://{host}:{host_port}{}", task.health_check);
        info!(task = %task.id, %url, "calling health check");

        let resp = self.http.get(&url).send().await.map_err(|e| {
            warn!(task = %task.id, %url, error = %e, "error connecting to health check");
            ManagerError::Transport(e)
        })?;

        if resp.status() != reqwest::StatusCode::OK {
            warn!(task = %task.id, status = %resp.status(), "health check did not return 200");
            return Err(ManagerError::WorkerResponse {
                worker: worker.clone(),
                status: resp.status().as_u16(),
            });
        }

        debug!(task = %task.id, "health check passed");
        Ok(())
    }

    /// Bump the restart bookkeeping, persist it, then ask the worker to run
    /// the task again. The count moves before the event is sent so a lost
    /// response can never under-count.
    pub async fn restart_task(&mut self, task: &Task) {
        let Some(worker) = self.task_worker_map.get(&task.id).cloned() else {
            warn!(task = %task.id, "cannot restart task without an assigned worker");
            return;
        };

        let mut task = task.clone();
        task.state = State::Scheduled;
        task.restart_count += 1;
        if let Err(e) = self.task_db.put(&task.id.to_string(), task.clone()) {
            error!(task = %task.id, error = %e, "failed to persist restart");
            return;
        }
        info!(task = %task.id, restart_count = task.restart_count, "restarting task");

        let te = TaskEvent {
            id: Uuid::new_v4(),
            state: State::Running,
            timestamp: Utc::now(),
            task: task.clone(),
        };

        let url = format!("http://{worker}/tasks");
        let resp = match self.http.post(&url).json(&te).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(%worker, error = %e, "error connecting to worker, requeueing restart");
                self.pending.push_back(te);
                return;
            }
        };

        if resp.status() != reqwest::StatusCode::CREATED {
            match resp.json::<ErrResponse>().await {
                Ok(err) => warn!(
                    status = err.http_status_code,
                    message = %err.message,
                    "worker rejected restart"
                ),
                Err(e) => error!(error = %e, "error decoding response"),
            }
            return;
        }

        match resp.json::<Task>().await {
            Ok(returned) => info!(task = %returned.id, %worker, "received response from worker"),
            Err(e) => error!(error = %e, "error decoding response"),
        }
    }

    /// Ask a worker to stop a task. Non-204 responses are logged and left
    /// for the next health-check cycle to observe.
    async fn stop_task(&self, worker: &str, task_id: &str) {
        let url = format!("http://{worker}/tasks/{task_id}");
        let resp = match self.http.delete(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(%url, error = %e, "error connecting to worker");
                return;
            }
        };

        if resp.status() != reqwest::StatusCode::NO_CONTENT {
            error!(task = %task_id, status = %resp.status(), "error sending stop request");
            return;
        }
        info!(task = %task_id, "task has been scheduled to be stopped");
    }
}

fn get_host_port(ports: &HashMap<String, Vec<PortBinding>>) -> Option<String> {
    ports
        .values()
        .find_map(|bindings| bindings.first())
        .map(|binding| binding.host_port.clone())
}

/// Dispatch loop: at most one pending event per tick.
pub async fn process_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        {
            let mut guard = manager.lock().await;
            guard.send_work().await;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}

/// Reconciliation loop.
pub async fn update_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        {
            let mut guard = manager.lock().await;
            guard.update_tasks().await;
        }
        tokio::time::sleep(Duration::from_secs(15)).await;
    }
}

/// Health-check loop.
pub async fn do_health_checks(manager: Arc<Mutex<Manager>>) {
    loop {
        {
            let mut guard = manager.lock().await;
            guard.do_health_checks().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::PortBinding;

    fn test_manager() -> Manager {
        Manager::new(vec!["127.0.0.1:1".to_string()], "epvm", "memory").unwrap()
    }

    #[test]
    fn new_registers_one_node_per_worker() {
        let manager = Manager::new(
            vec!["w1:5555".to_string(), "w2:5555".to_string()],
            "roundrobin",
            "memory",
        )
        .unwrap();

        assert_eq!(manager.worker_nodes.len(), 2);
        assert_eq!(manager.worker_nodes[0].name, "w1:5555");
        assert_eq!(manager.worker_nodes[0].api, "http://w1:5555");
        assert_eq!(manager.worker_nodes[0].role, "worker");
        assert!(manager.worker_task_map.contains_key("w2:5555"));
        assert!(matches!(
            manager.scheduler,
            Scheduler::RoundRobin { last_worker: 0 }
        ));
    }

    #[test]
    fn add_task_enqueues_fifo() {
        let mut manager = test_manager();
        let first = TaskEvent::default();
        let second = TaskEvent::default();

        manager.add_task(first.clone());
        manager.add_task(second);

        assert_eq!(manager.pending.len(), 2);
        assert_eq!(manager.pending.front().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn send_work_on_empty_queue_is_a_no_op() {
        let mut manager = test_manager();
        manager.send_work().await;
        assert_eq!(manager.event_db.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn send_work_without_candidates_requeues_and_persists_scheduled() {
        // the node has not advertised capacity yet, so nothing fits
        let mut manager = test_manager();
        let te = TaskEvent {
            state: State::Scheduled,
            task: Task {
                state: State::Scheduled,
                memory: 512,
                disk: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let task_id = te.task.id;
        manager.add_task(te.clone());

        manager.send_work().await;

        assert_eq!(manager.pending.len(), 1);
        assert_eq!(manager.event_db.count().unwrap(), 1);
        let stored = manager.task_db.get(&task_id.to_string()).unwrap();
        assert_eq!(stored.state, State::Scheduled);
        assert!(manager.task_worker_map.is_empty());
    }

    #[tokio::test]
    async fn send_work_drops_invalid_control_events() {
        let mut manager = test_manager();

        let task = Task {
            state: State::Running,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();
        manager
            .task_worker_map
            .insert(task.id, "127.0.0.1:1".to_string());

        // a second Scheduled event for a mapped task is not a valid control
        // event and must be dropped, not dispatched
        let te = TaskEvent {
            state: State::Scheduled,
            task: task.clone(),
            ..Default::default()
        };
        manager.add_task(te);

        manager.send_work().await;

        assert!(manager.pending.is_empty());
        assert_eq!(manager.event_db.count().unwrap(), 1);
        assert_eq!(
            manager.task_db.get(&task.id.to_string()).unwrap().state,
            State::Running
        );
    }

    #[tokio::test]
    async fn send_work_unassigns_the_worker_on_a_completed_control_event() {
        let mut manager = test_manager();
        let worker = "127.0.0.1:1".to_string();

        let task = Task {
            state: State::Running,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();
        manager.task_worker_map.insert(task.id, worker.clone());
        manager
            .worker_task_map
            .entry(worker.clone())
            .or_default()
            .push(task.id);

        let te = TaskEvent {
            state: State::Completed,
            task: task.clone(),
            ..Default::default()
        };
        manager.add_task(te);

        manager.send_work().await;

        // the stop request itself fails (nothing listens on the port), but
        // the task is no longer assigned to any worker
        assert!(manager.task_worker_map.is_empty());
        assert!(manager.worker_task_map[&worker].is_empty());
        assert!(manager.pending.is_empty());
    }

    #[tokio::test]
    async fn send_work_requeues_and_unassigns_when_the_worker_is_unreachable() {
        let mut manager = test_manager();
        manager.worker_nodes[0].memory = 2048;
        manager.worker_nodes[0].disk = 10_000;

        let te = TaskEvent {
            state: State::Scheduled,
            task: Task {
                state: State::Scheduled,
                memory: 512,
                disk: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let task_id = te.task.id;
        manager.add_task(te);

        // nothing listens on 127.0.0.1:1, so the POST fails
        manager.send_work().await;

        assert_eq!(manager.pending.len(), 1);
        assert!(manager.task_worker_map.is_empty());
        assert!(manager.worker_task_map["127.0.0.1:1"].is_empty());
        let stored = manager.task_db.get(&task_id.to_string()).unwrap();
        assert_eq!(stored.state, State::Scheduled);
    }

    #[test]
    fn merge_observed_applies_legal_transitions() {
        let mut manager = test_manager();

        let task = Task {
            state: State::Scheduled,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();

        let mut observed = task.clone();
        observed.state = State::Running;
        observed.container_id = Some("cafe".to_string());
        observed.start_time = Some(Utc::now());
        observed.host_ports.insert(
            "80/tcp".to_string(),
            vec![PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: "49200".to_string(),
            }],
        );
        manager.merge_observed(observed.clone());

        let stored = manager.task_db.get(&task.id.to_string()).unwrap();
        assert_eq!(stored.state, State::Running);
        assert_eq!(stored.container_id.as_deref(), Some("cafe"));
        assert_eq!(stored.host_ports, observed.host_ports);
    }

    #[test]
    fn merge_observed_drops_illegal_state_but_keeps_observations() {
        let mut manager = test_manager();

        let task = Task {
            state: State::Completed,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();

        // a late report cannot resurrect a completed task
        let mut observed = task.clone();
        observed.state = State::Running;
        observed.finish_time = Some(Utc::now());
        manager.merge_observed(observed.clone());

        let stored = manager.task_db.get(&task.id.to_string()).unwrap();
        assert_eq!(stored.state, State::Completed);
        assert_eq!(stored.finish_time, observed.finish_time);
    }

    #[test]
    fn merge_observed_is_idempotent() {
        let mut manager = test_manager();

        let task = Task {
            state: State::Scheduled,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();

        let mut observed = task.clone();
        observed.state = State::Running;
        observed.start_time = Some(Utc::now());

        manager.merge_observed(observed.clone());
        let first = manager.task_db.get(&task.id.to_string()).unwrap();
        manager.merge_observed(observed);
        let second = manager.task_db.get(&task.id.to_string()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn merge_observed_skips_unknown_tasks() {
        let mut manager = test_manager();
        manager.merge_observed(Task::default());
        assert_eq!(manager.task_db.count().unwrap(), 0);
    }

    #[test]
    fn recalculate_allocations_counts_active_tasks_only() {
        let mut manager = test_manager();
        let worker = "127.0.0.1:1".to_string();

        for (state, memory) in [
            (State::Running, 512u64),
            (State::Scheduled, 256),
            (State::Completed, 1024),
            (State::Failed, 2048),
        ] {
            let task = Task {
                state,
                memory,
                disk: 10,
                ..Default::default()
            };
            manager
                .task_db
                .put(&task.id.to_string(), task.clone())
                .unwrap();
            manager.task_worker_map.insert(task.id, worker.clone());
        }

        manager.recalculate_allocations();

        assert_eq!(manager.worker_nodes[0].memory_allocated, 768);
        assert_eq!(manager.worker_nodes[0].disk_allocated, 20);
    }

    #[test]
    fn select_worker_prefers_the_lightly_loaded_node() {
        let mut manager = Manager::new(
            vec!["a:1".to_string(), "b:1".to_string(), "c:1".to_string()],
            "epvm",
            "memory",
        )
        .unwrap();

        for node in &mut manager.worker_nodes {
            node.memory = 1000;
            node.disk = 10_000;
        }
        manager.worker_nodes[0].memory_allocated = 800;
        manager.worker_nodes[1].memory_allocated = 800;
        manager.worker_nodes[2].memory_allocated = 200;

        let task = Task {
            memory: 100,
            disk: 100,
            ..Default::default()
        };
        let picked = manager.select_worker(&task).unwrap();
        assert_eq!(picked.name, "c:1");
    }

    #[tokio::test]
    async fn restart_task_bumps_the_count_before_sending() {
        let mut manager = test_manager();

        let task = Task {
            state: State::Failed,
            restart_count: 1,
            ..Default::default()
        };
        manager
            .task_db
            .put(&task.id.to_string(), task.clone())
            .unwrap();
        manager
            .task_worker_map
            .insert(task.id, "127.0.0.1:1".to_string());

        manager.restart_task(&task).await;

        let stored = manager.task_db.get(&task.id.to_string()).unwrap();
        assert_eq!(stored.restart_count, 2);
        assert_eq!(stored.state, State::Scheduled);
    }
}
