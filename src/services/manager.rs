use crate::services::{Service, ServiceResult, run_service};
use crate::utils::fmt_duration;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owns every registered service: spawns them, reports the first to exit,
/// and coordinates shutdown.
pub struct ServiceManager {
    registered: Vec<(String, Box<dyn Service>)>,
    handles: HashMap<String, JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<(String, ServiceResult)>,
    completion_rx: mpsc::UnboundedReceiver<(String, ServiceResult)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered: Vec::new(),
            handles: HashMap::new(),
            completion_tx,
            completion_rx,
            shutdown_tx,
        }
    }

    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered.push((name.to_string(), service));
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.handles.is_empty()
    }

    /// Spawn every registered service on its own task.
    pub fn spawn_all(&mut self) {
        for (name, service) in self.registered.drain(..) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let completion_tx = self.completion_tx.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let result = run_service(service, shutdown_rx).await;
                // The manager may already be gone during process exit.
                let _ = completion_tx.send((task_name, result));
            });
            debug!(service = %name, "service spawned");
            self.handles.insert(name, handle);
        }
        info!(services = self.handles.len(), "all services spawned");
    }

    /// Wait for the first service to exit on its own.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        match self.completion_rx.recv().await {
            Some((name, result)) => {
                self.handles.remove(&name);
                (name, result)
            }
            None => (
                "manager".to_string(),
                ServiceResult::Error(anyhow::anyhow!("completion channel closed")),
            ),
        }
    }

    /// Signal every service to stop and wait up to `timeout` for them.
    ///
    /// On timeout, returns the names of services still running; they are
    /// aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let start = Instant::now();
        let running = self.handles.len();
        info!(services = running, timeout = fmt_duration(timeout), "shutting down services");
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = Vec::new();
        for (name, handle) in self.handles.drain() {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(service = %name, "service did not stop in time, aborting");
                abort.abort();
                pending.push(name);
            }
        }

        if pending.is_empty() {
            Ok(start.elapsed())
        } else {
            Err(pending)
        }
    }
}
