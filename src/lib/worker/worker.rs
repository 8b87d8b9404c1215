use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use sysinfo::System;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::stats::get_stats;
use super::types::{Processed, SystemStats, Worker, WorkerError, WorkerHandle, WorkerResult};
use crate::queue::Queue;
use crate::tasks::{
    runtime::Runtime,
    state::valid_state_transition,
    types::{State, Task, TaskEvent, TaskRequest},
};

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn Runtime>) -> Self {
        // cpu usage is a delta between refreshes, so take the baseline now
        let mut sysinfo = System::new();
        sysinfo.refresh_cpu_usage();

        Worker {
            name: name.to_string(),
            queue: Mutex::new(Queue::new()),
            db: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            runtime,
            processing: Mutex::new(()),
            sysinfo: Mutex::new(sysinfo),
        }
    }

    /// Queues a request; it is validated only when processed.
    pub async fn submit_task_request(&self, request: TaskRequest) {
        let mut queue = self.queue.lock().await;
        debug!(
            task_id = %request.id,
            required_state = %request.required_state,
            queued = queue.len() + 1,
            "task request queued"
        );
        queue.enqueue(request);
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.db.read().await.get(&id).cloned()
    }

    pub async fn task_count(&self) -> usize {
        self.db.read().await.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Committed state changes, oldest first.
    pub async fn events(&self) -> Vec<TaskEvent> {
        self.events.read().await.clone()
    }

    /// Host usage since the previous sample. CPU usage reads 0 when called
    /// within `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL` of the last sample.
    pub async fn stats(&self) -> SystemStats {
        let task_count = self.task_count().await as u64;
        let mut sysinfo = self.sysinfo.lock().await;
        sysinfo.refresh_cpu_usage();
        sysinfo.refresh_memory();
        get_stats(&self.name, &sysinfo, task_count)
    }

    /// Takes the oldest request off the queue and applies it.
    ///
    /// Processing steps never overlap, so at most one runtime call is in
    /// flight per worker.
    pub async fn process_one(&self) -> WorkerResult<Processed> {
        let _processing = self.processing.lock().await;

        let request = self.queue.lock().await.dequeue();
        let Some(request) = request else {
            debug!(worker = %self.name, "no task requests to process");
            return Ok(Processed::Idle);
        };

        match request.required_state {
            State::Scheduled => self.start_task(request).await,
            State::Completed => self.stop_task(request.id).await,
            other => Err(WorkerError::TransitionNotImplemented(other)),
        }
    }

    async fn start_task(&self, request: TaskRequest) -> WorkerResult<Processed> {
        if self.db.read().await.contains_key(&request.id) {
            return Err(WorkerError::TaskAlreadyExists(request.id));
        }

        let mut task = request.task();
        advance(&mut task, State::Scheduled)?;
        task.start_time = Some(Utc::now());

        match self.runtime.run(&task.config()).await {
            Err(source) => {
                advance(&mut task, State::Failed)?;
                self.commit(task).await;
                Err(WorkerError::Runtime {
                    id: request.id,
                    source,
                })
            }
            Ok(output) => {
                advance(&mut task, State::Running)?;
                task.container_id = Some(output.container_id.clone());
                task.port = output.port;
                self.commit(task).await;

                info!(
                    task_id = %request.id,
                    container_id = %output.container_id,
                    port = output.port,
                    "task started"
                );
                Ok(Processed::Started {
                    id: request.id,
                    container_id: output.container_id,
                    port: output.port,
                })
            }
        }
    }

    async fn stop_task(&self, id: Uuid) -> WorkerResult<Processed> {
        let Some(mut task) = self.get_task(id).await else {
            return Err(WorkerError::TaskNotFound(id));
        };

        if task.state != State::Running {
            return Err(WorkerError::IllegalTransition {
                id,
                from: task.state,
                to: State::Completed,
            });
        }

        let Some(container_id) = task.container_id.clone() else {
            return Err(WorkerError::MissingContainer(id));
        };

        self.runtime
            .remove(&container_id)
            .await
            .map_err(|source| WorkerError::Runtime { id, source })?;

        task.finish_time = Some(Utc::now());
        advance(&mut task, State::Completed)?;
        self.commit(task).await;

        info!(task_id = %id, %container_id, "task completed");
        Ok(Processed::Stopped { id })
    }

    /// Replaces the registry entry as a whole and records the change.
    async fn commit(&self, task: Task) {
        let event = TaskEvent::new(&task);
        self.db.write().await.insert(task.id, task);
        self.events.write().await.push(event);
    }
}

fn advance(task: &mut Task, to: State) -> WorkerResult<()> {
    if !valid_state_transition(task.state, to) {
        return Err(WorkerError::IllegalTransition {
            id: task.id,
            from: task.state,
            to,
        });
    }
    task.state = to;
    Ok(())
}

/// Drains the worker's queue every `interval` until `shutdown` flips to
/// true or its sender is dropped.
pub async fn run_loop(
    worker: Arc<Worker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = %worker.name, ?interval, "processing loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if worker.queue_len().await > 0 {
            match worker.process_one().await {
                Ok(processed) => debug!(?processed, "task request processed"),
                Err(e) => error!(worker = %worker.name, error = %e, "error processing task request"),
            }
        } else {
            debug!(worker = %worker.name, "no task requests in queue, waiting");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!(worker = %worker.name, "shutdown sender dropped");
                    break;
                }
            }
        }
    }

    info!(worker = %worker.name, "processing loop stopped");
}

impl WorkerHandle {
    pub fn spawn(worker: Arc<Worker>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(worker, interval, shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone if the loop exited
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "processing loop panicked");
        }
    }
}
