use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

use crate::buildtask::requests::TaskRequest;
use crate::error::{AppError, AppResult};
use crate::world::{apply, WorldError, WorldOperations};

type Job = Box<dyn FnOnce(&mut dyn WorldOperations) + Send>;

/// Sole owner of the live world.
///
/// Jobs are queued on a bounded channel and run one at a time, in arrival
/// order, on a dedicated OS thread. Callers wait for the reply with a
/// deadline; a job that misses it still runs to completion on the writer.
pub struct WorldWriter {
    sender: mpsc::Sender<Job>,
    timeout: Duration,
}

impl WorldWriter {
    pub fn spawn(
        world: Box<dyn WorldOperations>,
        capacity: usize,
        timeout: Duration,
    ) -> AppResult<Self> {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));

        thread::Builder::new()
            .name("world-writer".to_string())
            .spawn(move || {
                let mut world = world;
                info!("World writer started");
                while let Some(job) = receiver.blocking_recv() {
                    job(world.as_mut());
                }
                info!("World writer stopped");
            })
            .map_err(|e| AppError::Internal(format!("Failed to start world writer thread: {}", e)))?;

        Ok(Self { sender, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Runs `op` against the world on the writer thread and returns its result.
    pub async fn submit<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WorldOperations) -> T + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T, String>>();

        let job: Job = Box::new(move |world: &mut dyn WorldOperations| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(world))).map_err(|payload| {
                payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string())
            });
            if let Err(msg) = &outcome {
                error!(panic = %msg, "World operation panicked");
            }
            // The caller may have given up already.
            let _ = reply_tx.send(outcome);
        });

        match timeout_at(deadline, self.sender.send(job)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(AppError::ServiceUnavailable(
                    "World writer is not running".to_string(),
                ))
            }
            Err(_) => return Err(self.timed_out()),
        }

        match timeout_at(deadline, reply_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(panic_msg))) => Err(AppError::Internal(format!(
                "World operation panicked: {}",
                panic_msg
            ))),
            Ok(Err(_)) => Err(AppError::ServiceUnavailable(
                "World writer dropped the request".to_string(),
            )),
            Err(_) => Err(self.timed_out()),
        }
    }

    /// Dispatches a decoded task request.
    pub async fn execute(&self, request: TaskRequest) -> AppResult<Result<String, WorldError>> {
        debug!(task_type = %request.task_type(), "Dispatching to world writer");
        self.submit(move |world| apply(world, &request)).await
    }

    fn timed_out(&self) -> AppError {
        AppError::TimeoutError(format!(
            "World operation timed out after {} ms",
            self.timeout.as_millis()
        ))
    }
}
