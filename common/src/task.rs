use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Receiving side of a stop request. Long-lived loops select on
/// [`StopSignal::stopped`] next to their own work.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once a stop has been requested, or the owning handle is gone.
    pub async fn stopped(&mut self) {
        // An Err means the sender was dropped, which also means stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Owner of a spawned loop. `stop` is idempotent: the first call signals the
/// loop and waits for it, later calls return immediately.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `body` with a fresh stop signal.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, rx) = watch::channel(false);
        let task = tokio::spawn(body(StopSignal { rx }));
        debug!(task = name, "task started");
        Self {
            name,
            stop_tx,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.stop_tx.send_replace(true);
        match task.await {
            Ok(()) => debug!(task = self.name, "task stopped"),
            Err(e) => error!(task = self.name, error = %e, "task ended abnormally"),
        }
    }
}
