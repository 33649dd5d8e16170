// SPDX-License-Identifier: Apache-2.0

//! Local reconciliation loop: dequeue a task intent, make the container
//! runtime match it, and keep the task store's view of running containers
//! fresh.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::store::Store;
use common::task::{valid_transition, Config, State, Task, TaskEvent};
use common::{Error, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::runtime::{ContainerInspectResponse, ContainerRuntime, DaemonRuntime};

pub struct Worker {
    pub name: String,
    daemon_socket: String,
    queue: Mutex<VecDeque<TaskEvent>>,
    tasks: Arc<dyn Store<Task>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, daemon_socket: impl Into<String>, tasks: Arc<dyn Store<Task>>) -> Self {
        Worker {
            name: name.into(),
            daemon_socket: daemon_socket.into(),
            queue: Mutex::new(VecDeque::new()),
            tasks,
        }
    }

    pub async fn add_task(&self, event: TaskEvent) {
        self.queue.lock().await.push_back(event);
    }

    pub async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.tasks.list().await
    }

    pub async fn inspect_task(&self, task: &Task) -> Result<ContainerInspectResponse> {
        let runtime = DaemonRuntime::new(&self.daemon_socket, Config::from(task));
        runtime.inspect(&task.container_id).await
    }

    /// Dequeues and reconciles one task intent. A no-op (`Ok(())`) when the
    /// queue is empty; the caller is expected to sleep on its own interval
    /// rather than call this in a tight loop.
    pub async fn run_task(&self) -> Result<()> {
        let event = {
            let mut queue = self.queue.lock().await;
            queue.pop_front()
        };
        let Some(event) = event else {
            debug!("no tasks in the queue");
            return Ok(());
        };

        let queued = event.task.clone();

        self.tasks.put(&queued.id.to_string(), queued.clone()).await?;
        let persisted = self.tasks.get(&queued.id.to_string()).await?;

        if persisted.state == State::Completed {
            self.stop_task(persisted).await;
            return Ok(());
        }

        if !valid_transition(persisted.state, queued.state) {
            return Err(Error::InvalidTransition {
                from: persisted.state.to_string(),
                to: queued.state.to_string(),
            });
        }

        match queued.state {
            State::Scheduled => {
                let mut task = persisted;
                if !task.container_id.is_empty() {
                    self.stop_task(task.clone()).await;
                    task = self.tasks.get(&queued.id.to_string()).await?;
                }
                self.start_task(task).await;
            }
            State::Completed => {
                self.stop_task(persisted).await;
            }
            other => {
                error!(state = %other, "run_task reached a transition outside {{Scheduled, Completed}}");
                return Err(Error::RuntimeFailure(
                    "worker reconciliation reached an unreachable transition".to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn start_task(&self, mut task: Task) {
        let runtime = DaemonRuntime::new(&self.daemon_socket, Config::from(&task));
        match runtime.run().await {
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "starting task failed");
                task.state = State::Failed;
                if let Err(e) = self.tasks.put(&task.id.to_string(), task).await {
                    error!("failed to persist failed task: {e}");
                }
            }
            Ok(result) => {
                task.container_id = result.container_id;
                task.state = State::Running;
                task.start_time = Some(Utc::now());
                info!(task_id = %task.id, container_id = %task.container_id, "task running");
                if let Err(e) = self.tasks.put(&task.id.to_string(), task).await {
                    error!("failed to persist started task: {e}");
                }
            }
        }
    }

    async fn stop_task(&self, mut task: Task) {
        let runtime = DaemonRuntime::new(&self.daemon_socket, Config::from(&task));
        if let Err(e) = runtime.stop(&task.container_id).await {
            warn!(task_id = %task.id, error = %e, "stopping container failed");
        }
        if let Err(e) = runtime.remove(&task.container_id).await {
            warn!(task_id = %task.id, error = %e, "removing container failed");
        }
        task.finish_time = Some(Utc::now());
        task.state = State::Completed;
        info!(task_id = %task.id, "task completed");
        if let Err(e) = self.tasks.put(&task.id.to_string(), task).await {
            error!("failed to persist completed task: {e}");
        }
    }

    async fn update_tasks_once(&self) {
        let tasks = match self.tasks.list().await {
            Ok(t) => t,
            Err(e) => {
                error!("error getting list of tasks: {e}");
                return;
            }
        };
        for mut task in tasks {
            if task.state != State::Running {
                continue;
            }
            match self.inspect_task(&task).await {
                Ok(resp) if resp.status == "exited" => {
                    info!(task_id = %task.id, "container exited, marking task failed");
                    task.state = State::Failed;
                }
                Ok(resp) => {
                    task.host_ports = resp.host_ports;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "no container found for running task");
                    task.state = State::Failed;
                }
            }
            if let Err(e) = self.tasks.put(&task.id.to_string(), task).await {
                error!("error persisting task update: {e}");
            }
        }
    }

    pub async fn run_tasks_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("run_tasks loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_task().await {
                        warn!("run_task error: {e}");
                    }
                }
            }
        }
    }

    pub async fn update_tasks_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("update_tasks loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    debug!("checking status of tasks");
                    self.update_tasks_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::MemoryStore;

    fn worker() -> Worker {
        Worker::new("w1", "/var/run/docker.sock", Arc::new(MemoryStore::<Task>::new()))
    }

    #[tokio::test]
    async fn run_task_on_empty_queue_is_a_noop() {
        let w = worker();
        assert!(w.run_task().await.is_ok());
    }

    #[tokio::test]
    async fn add_task_enqueues_for_run_task_to_dequeue() {
        let w = worker();
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        let event = TaskEvent::new(State::Scheduled, task);
        w.add_task(event).await;
        assert_eq!(w.queue.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn get_tasks_reflects_store_contents() {
        let w = worker();
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        w.tasks.put(&task.id.to_string(), task.clone()).await.unwrap();
        let tasks = w.get_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "web");
    }
}
