use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::stats::{get_stats, Stats};
use crate::store::{Store, StoreError};
use crate::task::{
    docker::{host_ports_from_inspect, DockerClient},
    state::valid_state_transition,
    types::{new_config, DockerError, DockerResult, State, Task, TaskEvent},
};

/// Executes tasks against the local container runtime. The queue and db are
/// only touched with the worker lock held, so the run loop, the stats loop,
/// and the HTTP handlers never race each other.
pub struct Worker {
    pub name: String,
    pub queue: VecDeque<TaskEvent>,
    pub db: Box<dyn Store<Task>>,
    pub task_count: u64,
    pub stats: Stats,
    pub sysinfo: System,
}

impl Worker {
    pub fn new(name: &str, db: Box<dyn Store<Task>>) -> Self {
        Worker {
            name: name.to_string(),
            queue: VecDeque::new(),
            db,
            task_count: 0,
            stats: Stats::default(),
            sysinfo: System::new_all(),
        }
    }

    pub fn add_task(&mut self, te: TaskEvent) {
        self.queue.push_back(te);
    }

    pub fn get_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.db.list()
    }

    /// Drain one event off the queue and act on its intent. Returns `None`
    /// when the queue was empty.
    pub async fn run_task(&mut self) -> Option<DockerResult> {
        let Some(te) = self.queue.pop_front() else {
            debug!("no tasks in queue");
            return None;
        };

        let key = te.task.id.to_string();
        let persisted = match self.db.get(&key) {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => {
                if let Err(e) = self.db.put(&key, te.task.clone()) {
                    error!(task = %te.task.id, error = %e, "failed to persist new task");
                    return Some(DockerResult::with_error(DockerError::Client(e.to_string())));
                }
                te.task.clone()
            }
            Err(e) => {
                error!(task = %te.task.id, error = %e, "failed to read task");
                return Some(DockerResult::with_error(DockerError::Client(e.to_string())));
            }
        };

        if !valid_state_transition(&persisted.state, &te.state) {
            warn!(
                task = %te.task.id,
                from = ?persisted.state,
                to = ?te.state,
                "invalid state transition, dropping event"
            );
            return Some(DockerResult::with_error(DockerError::Client(format!(
                "invalid state transition from {:?} to {:?}",
                persisted.state, te.state
            ))));
        }

        match te.state {
            // Running intent is a restart request from the manager
            State::Scheduled | State::Running => Some(self.start_task(te.task).await),
            State::Completed => Some(self.stop_task(persisted).await),
            other => {
                warn!(task = %te.task.id, state = ?other, "unexpected event state, dropping");
                Some(DockerResult::with_error(DockerError::Client(format!(
                    "cannot process event with state {other:?}"
                ))))
            }
        }
    }

    pub async fn start_task(&mut self, mut task: Task) -> DockerResult {
        task.start_time = Some(Utc::now());
        let key = task.id.to_string();

        let docker = match DockerClient::new(new_config(&task)) {
            Ok(client) => client,
            Err(e) => return self.fail_task(task, e),
        };

        let result = docker.run().await;
        if let Some(err) = result.error.clone() {
            error!(task = %task.id, error = %err, "error running task");
            return self.fail_task(task, err);
        }

        task.container_id = result.container_id.clone();

        // Host ports stay empty unless the runtime reports a running
        // container and the inspect succeeds.
        if let Some(container_id) = task.container_id.clone() {
            match docker.inspect(&container_id).await {
                Ok(resp) => task.host_ports = host_ports_from_inspect(&resp),
                Err(e) => warn!(task = %task.id, error = %e, "inspect after start failed"),
            }
        }

        task.state = State::Running;
        if let Err(e) = self.db.put(&key, task.clone()) {
            error!(task = %task.id, error = %e, "failed to persist running task");
        }
        self.task_count += 1;

        result
    }

    pub async fn stop_task(&mut self, mut task: Task) -> DockerResult {
        let result = match (DockerClient::new(new_config(&task)), task.container_id.clone()) {
            (Ok(docker), Some(container_id)) => docker.stop(&container_id).await,
            (Err(e), _) => DockerResult::with_error(e),
            (Ok(_), None) => DockerResult::with_error(DockerError::ContainerStop(format!(
                "task {} has no container to stop",
                task.id
            ))),
        };

        // The task is finished regardless of how the runtime call went; the
        // error still travels back in the result.
        task.state = State::Completed;
        task.finish_time = Some(Utc::now());
        if let Err(e) = self.db.put(&task.id.to_string(), task.clone()) {
            error!(task = %task.id, error = %e, "failed to persist completed task");
        }
        self.task_count = self.task_count.saturating_sub(1);

        match &result.error {
            Some(err) => error!(task = %task.id, error = %err, "error stopping task"),
            None => info!(task = %task.id, "stopped and removed container"),
        }
        result
    }

    fn fail_task(&mut self, mut task: Task, err: DockerError) -> DockerResult {
        task.state = State::Failed;
        task.finish_time = Some(Utc::now());
        if let Err(e) = self.db.put(&task.id.to_string(), task.clone()) {
            error!(task = %task.id, error = %e, "failed to persist failed task");
        }
        DockerResult::with_error(err)
    }

    pub fn collect_stats(&mut self) {
        self.sysinfo.refresh_all();
        self.stats = get_stats(&self.sysinfo, self.task_count);
    }
}

/// Run loop: drain at most one queued event every tick.
pub async fn run_tasks(worker: Arc<Mutex<Worker>>) {
    loop {
        {
            let mut guard = worker.lock().await;
            if let Some(result) = guard.run_task().await {
                if let Some(err) = result.error {
                    error!(error = %err, "task run failed");
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}

/// Stats loop: refresh the snapshot served on /stats.
pub async fn collect_stats(worker: Arc<Mutex<Worker>>) {
    loop {
        {
            let mut guard = worker.lock().await;
            guard.collect_stats();
            debug!(worker = %guard.name, stats = ?guard.stats, "collected stats");
        }
        tokio::time::sleep(Duration::from_secs(15)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn test_worker() -> Worker {
        Worker::new("worker-1:5555", Box::new(InMemoryStore::new()))
    }

    #[test]
    fn add_task_queues_fifo() {
        let mut worker = test_worker();
        let first = TaskEvent::default();
        let second = TaskEvent::default();

        worker.add_task(first.clone());
        worker.add_task(second.clone());

        assert_eq!(worker.queue.len(), 2);
        assert_eq!(worker.queue.front().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn run_task_on_empty_queue_is_a_no_op() {
        let mut worker = test_worker();
        assert!(worker.run_task().await.is_none());
        assert_eq!(worker.db.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn run_task_rejects_illegal_transitions() {
        let mut worker = test_worker();

        let done = Task {
            state: State::Completed,
            ..Default::default()
        };
        worker.db.put(&done.id.to_string(), done.clone()).unwrap();

        let te = TaskEvent {
            state: State::Scheduled,
            task: done.clone(),
            ..Default::default()
        };
        worker.add_task(te);

        let result = worker.run_task().await.unwrap();
        assert!(result.error.is_some());
        // the persisted record did not move
        assert_eq!(
            worker.db.get(&done.id.to_string()).unwrap().state,
            State::Completed
        );
    }

    #[tokio::test]
    async fn run_task_rejects_unexpected_intent() {
        let mut worker = test_worker();

        let running = Task {
            state: State::Running,
            ..Default::default()
        };
        worker
            .db
            .put(&running.id.to_string(), running.clone())
            .unwrap();

        let te = TaskEvent {
            state: State::Failed,
            task: running.clone(),
            ..Default::default()
        };
        worker.add_task(te);

        let result = worker.run_task().await.unwrap();
        assert!(result.error.is_some());
        assert_eq!(
            worker.db.get(&running.id.to_string()).unwrap().state,
            State::Running
        );
    }

    #[test]
    fn get_tasks_lists_every_db_entry() {
        let mut worker = test_worker();
        for _ in 0..3 {
            let task = Task::default();
            worker.db.put(&task.id.to_string(), task).unwrap();
        }
        assert_eq!(worker.get_tasks().unwrap().len(), 3);
    }
}
