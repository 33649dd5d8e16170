// SPDX-License-Identifier: Apache-2.0

//! The dispatcher: accepts task submissions, schedules them onto a worker,
//! pulls status back, and restarts tasks that fail their health check.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use common::node::{Node, Role};
use common::scheduler::Scheduler;
use common::store::Store;
use common::task::{valid_transition, State, Task, TaskEvent};
use common::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
struct ErrorEnvelope {
    http_status_code: u16,
    message: String,
}

pub struct Manager {
    pending: Mutex<VecDeque<TaskEvent>>,
    task_db: Arc<dyn Store<Task>>,
    event_db: Arc<dyn Store<TaskEvent>>,
    workers: Vec<String>,
    worker_task_map: Mutex<HashMap<String, Vec<Uuid>>>,
    task_worker_map: Mutex<HashMap<Uuid, String>>,
    nodes: RwLock<HashMap<String, Node>>,
    scheduler: Mutex<Box<dyn Scheduler>>,
    http: reqwest::Client,
}

impl Manager {
    /// `worker_memory`/`worker_disk` are the declared capacity (bytes)
    /// applied to every configured worker node; the manager has no channel
    /// to pull a worker's actual host capacity, so this is what the
    /// scheduler treats as each node's ceiling.
    pub fn new(
        workers: Vec<String>,
        scheduler: Box<dyn Scheduler>,
        task_db: Arc<dyn Store<Task>>,
        event_db: Arc<dyn Store<TaskEvent>>,
        worker_memory: i64,
        worker_disk: i64,
    ) -> Self {
        let mut nodes = HashMap::new();
        let mut worker_task_map = HashMap::new();
        for worker in &workers {
            let mut node = Node::new(worker.clone(), format!("http://{worker}"), Role::Worker);
            node.memory = worker_memory;
            node.disk = worker_disk;
            nodes.insert(worker.clone(), node);
            worker_task_map.insert(worker.clone(), Vec::new());
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with fixed timeouts always builds");

        Manager {
            pending: Mutex::new(VecDeque::new()),
            task_db,
            event_db,
            workers,
            worker_task_map: Mutex::new(worker_task_map),
            task_worker_map: Mutex::new(HashMap::new()),
            nodes: RwLock::new(nodes),
            scheduler: Mutex::new(scheduler),
            http,
        }
    }

    pub async fn add_task(&self, event: TaskEvent) {
        info!(task_id = %event.task.id, "adding event to pending queue");
        self.pending.lock().await.push_back(event);
    }

    pub async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.task_db.list().await
    }

    pub async fn get_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn select_worker(&self, task: &Task) -> Result<Node> {
        let nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        let mut scheduler = self.scheduler.lock().await;
        let candidates = scheduler.select_candidate_nodes(task, &nodes);
        if candidates.is_empty() {
            return Err(Error::NoCandidates(task.id.to_string()));
        }
        let scores = scheduler.score(task, &candidates);
        Ok(scheduler.pick(&scores, &candidates).clone())
    }

    /// Dispatches one pending event. A no-op when the pending queue is
    /// empty; the caller is expected to sleep on its own interval.
    pub async fn send_work(&self) {
        let event = {
            let mut pending = self.pending.lock().await;
            pending.pop_front()
        };
        let Some(event) = event else {
            debug!("no work in the queue");
            return;
        };

        if let Err(e) = self.event_db.put(&event.id.to_string(), event.clone()).await {
            warn!("error attempting to store task event {}: {e}", event.id);
        }

        let task_id = event.task.id;
        let dispatched_worker = self.task_worker_map.lock().await.get(&task_id).cloned();

        if let Some(worker) = dispatched_worker {
            let persisted = match self.task_db.get(&task_id.to_string()).await {
                Ok(task) => task,
                Err(e) => {
                    warn!("unable to schedule task: {e}");
                    return;
                }
            };
            if event.state == State::Completed && valid_transition(persisted.state, State::Completed) {
                self.stop_task(&worker, &task_id.to_string()).await;
                return;
            }
            warn!(
                "invalid request: existing task {task_id} is in state {:?} and cannot transition to Completed",
                persisted.state
            );
            return;
        }

        let mut task = event.task.clone();
        let node = match self.select_worker(&task).await {
            Ok(node) => node,
            Err(e) => {
                warn!("error selecting worker for task {task_id}: {e}");
                return;
            }
        };
        info!("selected worker {} for task {task_id}", node.name);

        self.worker_task_map
            .lock()
            .await
            .entry(node.name.clone())
            .or_default()
            .push(task_id);
        self.task_worker_map.lock().await.insert(task_id, node.name.clone());

        task.state = State::Scheduled;
        if let Err(e) = self.task_db.put(&task_id.to_string(), task).await {
            error!("error storing task {task_id}: {e}");
            return;
        }

        let url = format!("http://{}/tasks", node.name);
        match self.http.post(&url).json(&event).send().await {
            Err(e) => {
                warn!("error connecting to {}: {e}", node.name);
                self.pending.lock().await.push_back(event);
            }
            Ok(resp) if resp.status() == StatusCode::CREATED => match resp.json::<Task>().await {
                Ok(received) => {
                    self.bump_task_count(&node.name).await;
                    info!("received response from worker for task {}", received.id);
                }
                Err(e) => error!("error decoding response: {e}"),
            },
            Ok(resp) => self.log_error_envelope(resp).await,
        }
    }

    async fn bump_task_count(&self, worker_name: &str) {
        if let Some(node) = self.nodes.write().await.get_mut(worker_name) {
            node.task_count += 1;
        }
    }

    async fn log_error_envelope(&self, resp: reqwest::Response) {
        match resp.json::<ErrorEnvelope>().await {
            Ok(envelope) => error!("response error ({}): {}", envelope.http_status_code, envelope.message),
            Err(e) => error!("error decoding response: {e}"),
        }
    }

    async fn stop_task(&self, worker: &str, task_id: &str) {
        let url = format!("http://{worker}/tasks/{task_id}");
        match self.http.delete(&url).send().await {
            Ok(resp) if resp.status() == StatusCode::NO_CONTENT => {
                info!("task {task_id} has been scheduled to be stopped");
            }
            Ok(resp) => warn!("error stopping task {task_id}: worker returned {}", resp.status()),
            Err(e) => warn!("error connecting to worker at {url}: {e}"),
        }
    }

    async fn update_tasks_once(&self) {
        for worker in &self.workers {
            let url = format!("http://{worker}/tasks");
            let resp = match self.http.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("error connecting to {worker}: {e}");
                    continue;
                }
            };
            if !resp.status().is_success() {
                warn!("error sending request to {worker}: status {}", resp.status());
                continue;
            }
            let tasks: Vec<Task> = match resp.json().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!("error unmarshalling tasks from {worker}: {e}");
                    continue;
                }
            };
            for task in tasks {
                let mut persisted = match self.task_db.get(&task.id.to_string()).await {
                    Ok(persisted) => persisted,
                    Err(e) => {
                        warn!("{e}");
                        continue;
                    }
                };
                persisted.state = task.state;
                persisted.start_time = task.start_time;
                persisted.finish_time = task.finish_time;
                persisted.container_id = task.container_id;
                persisted.host_ports = task.host_ports;
                if let Err(e) = self.task_db.put(&persisted.id.to_string(), persisted).await {
                    error!("error updating task {}: {e}", task.id);
                }
            }
        }
    }

    async fn do_health_checks_once(&self) {
        let tasks = self.task_db.list().await.unwrap_or_default();
        for task in tasks {
            if task.state == State::Running && task.restart_count < 3 {
                if self.check_task_health(&task).await.is_err() {
                    self.restart_task(task.id).await;
                }
            } else if task.state == State::Failed && task.restart_count < 3 {
                self.restart_task(task.id).await;
            }
        }
    }

    async fn check_task_health(&self, task: &Task) -> Result<()> {
        let Some(health_check) = &task.health_check else {
            return Ok(());
        };
        let worker = self.task_worker_map.lock().await.get(&task.id).cloned();
        let Some(worker) = worker else {
            return Ok(());
        };
        let Some(host_port) = first_host_port(task) else {
            debug!("have not collected task {} host port yet, skipping", task.id);
            return Ok(());
        };
        let host = worker.split(':').next().unwrap_or(&worker);
        let url = format!("http://{host}:{host_port}{health_check}");
        debug!("calling health check for task {}: {url}", task.id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unreachable(format!("connecting to health check {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Unreachable(format!("health check for task {} returned {}", task.id, resp.status())));
        }
        Ok(())
    }

    async fn restart_task(&self, task_id: Uuid) {
        let worker = self.task_worker_map.lock().await.get(&task_id).cloned();
        let Some(worker) = worker else {
            warn!("no worker recorded for task {task_id}, cannot restart");
            return;
        };
        let mut task = match self.task_db.get(&task_id.to_string()).await {
            Ok(task) => task,
            Err(e) => {
                warn!("error fetching task {task_id} for restart: {e}");
                return;
            }
        };
        task.state = State::Scheduled;
        task.restart_count += 1;
        if let Err(e) = self.task_db.put(&task_id.to_string(), task.clone()).await {
            error!("error updating task {task_id}: {e}");
            return;
        }

        let event = TaskEvent::new(State::Running, task);
        let url = format!("http://{worker}/tasks");
        match self.http.post(&url).json(&event).send().await {
            Err(e) => {
                warn!("error connecting to {worker}: {e}");
                self.pending.lock().await.push_back(event);
            }
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                info!("task {task_id} restarted on {worker}");
            }
            Ok(resp) => self.log_error_envelope(resp).await,
        }
    }

    pub async fn process_tasks_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => { info!("process_tasks loop shutting down"); break; }
                _ = interval.tick() => self.send_work().await,
            }
        }
    }

    pub async fn update_tasks_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => { info!("update_tasks loop shutting down"); break; }
                _ = interval.tick() => {
                    debug!("checking for task updates from workers");
                    self.update_tasks_once().await;
                }
            }
        }
    }

    pub async fn do_health_checks_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => { info!("do_health_checks loop shutting down"); break; }
                _ = interval.tick() => {
                    debug!("performing task health checks");
                    self.do_health_checks_once().await;
                }
            }
        }
    }
}

fn first_host_port(task: &Task) -> Option<String> {
    task.host_ports.values().next()?.first().map(|b| b.host_port.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::scheduler::{Epvm, RoundRobin};
    use common::store::MemoryStore;

    fn manager(workers: Vec<&str>) -> Manager {
        Manager::new(
            workers.into_iter().map(String::from).collect(),
            Box::new(RoundRobin::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            536_870_912,
            10_737_418_240,
        )
    }

    #[tokio::test]
    async fn select_worker_succeeds_with_default_epvm_capacity() {
        let m = Manager::new(
            vec!["w1:8081".to_string()],
            Box::new(Epvm::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            536_870_912,
            10_737_418_240,
        );
        let task = Task::new("web", "nginx", 0.1, 64 * 1024 * 1024, 128 * 1024 * 1024);
        let node = m.select_worker(&task).await.unwrap();
        assert_eq!(node.name, "w1:8081");
    }

    #[tokio::test]
    async fn send_work_on_empty_queue_is_a_noop() {
        let m = manager(vec!["w1:8081"]);
        m.send_work().await;
        assert_eq!(m.get_tasks().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn select_worker_fails_with_no_candidates_when_no_workers_registered() {
        let m = manager(vec![]);
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        let err = m.select_worker(&task).await.unwrap_err();
        assert!(matches!(err, Error::NoCandidates(_)));
    }

    #[tokio::test]
    async fn add_task_enqueues_and_get_nodes_reflects_configured_workers() {
        let m = manager(vec!["w1:8081", "w2:8081"]);
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        m.add_task(TaskEvent::new(State::Scheduled, task)).await;
        assert_eq!(m.pending.lock().await.len(), 1);
        assert_eq!(m.get_nodes().await.len(), 2);
    }
}
