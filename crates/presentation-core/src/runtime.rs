//! The tokio runtime behind fire-and-forget async commands.
//!
//! A detached command future goes to the caller's tokio runtime when there is
//! one. Outside of tokio it goes to a process-wide [`CommandRuntime`], built
//! on first use from the [`RuntimeConfig`] recorded by
//! [`Setup::runtime`](crate::Setup::runtime) (or the default).
//!
//! ```no_run
//! use presentation_core::runtime::{CommandRuntime, RuntimeConfig};
//!
//! CommandRuntime::configure(RuntimeConfig::current_thread().with_thread_name("ui-commands"))
//!     .expect("configured before first use");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;

use crate::logging::targets;

static GLOBAL: OnceLock<CommandRuntime> = OnceLock::new();

/// Recorded by [`CommandRuntime::configure`], read once by the lazy builder.
static CONFIG: Mutex<Option<RuntimeConfig>> = Mutex::new(None);

/// Scheduler flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeType {
    /// Tokio's work-stealing pool.
    #[default]
    MultiThreaded,
    /// One scheduler thread drives every command.
    CurrentThread,
}

/// How the command runtime is built.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub runtime_type: RuntimeType,
    /// Pool size; `None` lets tokio pick one per core.
    pub worker_threads: Option<usize>,
    pub thread_name: String,
    /// Needed by commands that use `tokio::time`.
    pub enable_time: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::default(),
            worker_threads: None,
            thread_name: "presentation-commands".to_string(),
            enable_time: true,
        }
    }
}

impl RuntimeConfig {
    pub fn multi_threaded() -> Self {
        Self::default()
    }

    pub fn current_thread() -> Self {
        Self {
            runtime_type: RuntimeType::CurrentThread,
            ..Self::default()
        }
    }

    /// Ignored by the current-thread flavor.
    pub fn with_worker_threads(self, worker_threads: usize) -> Self {
        Self {
            worker_threads: Some(worker_threads),
            ..self
        }
    }

    pub fn with_thread_name(self, thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            ..self
        }
    }

    pub fn with_time(self, enable_time: bool) -> Self {
        Self { enable_time, ..self }
    }

    fn builder(&self) -> Builder {
        let mut builder = match self.runtime_type {
            RuntimeType::MultiThreaded => {
                let mut builder = Builder::new_multi_thread();
                builder.thread_name(self.thread_name.clone());
                if let Some(worker_threads) = self.worker_threads {
                    builder.worker_threads(worker_threads);
                }
                builder
            }
            RuntimeType::CurrentThread => Builder::new_current_thread(),
        };
        if self.enable_time {
            builder.enable_time();
        }
        builder
    }
}

/// Errors raised while creating the command runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The global runtime exists, so its configuration is fixed.
    #[error("command runtime already initialized")]
    AlreadyInitialized,

    #[error("failed to create command runtime: {0}")]
    CreationFailed(String),
}

/// What keeps the scheduler alive.
enum Owner {
    /// A multi-threaded runtime runs on its own pool.
    Pool(Runtime),
    /// A current-thread runtime is parked in `block_on` on a dedicated
    /// thread until `stop` fires.
    Driver {
        stop: oneshot::Sender<()>,
        thread: JoinHandle<()>,
    },
}

/// A tokio runtime dedicated to detached commands.
pub struct CommandRuntime {
    handle: Handle,
    runtime_type: RuntimeType,
    in_flight: Arc<AtomicU64>,
    owner: Owner,
}

impl CommandRuntime {
    /// The process-wide runtime, built on first use.
    pub fn global() -> Result<&'static CommandRuntime, RuntimeError> {
        if let Some(runtime) = GLOBAL.get() {
            return Ok(runtime);
        }
        let config = CONFIG.lock().take().unwrap_or_default();
        let runtime = CommandRuntime::new(config)?;
        // A concurrent caller may have won; its runtime is kept and ours dropped.
        let _ = GLOBAL.set(runtime);
        GLOBAL
            .get()
            .ok_or_else(|| RuntimeError::CreationFailed("global runtime unavailable".to_string()))
    }

    /// Record the configuration for the lazily built process-wide runtime.
    pub fn configure(config: RuntimeConfig) -> Result<(), RuntimeError> {
        if GLOBAL.get().is_some() {
            tracing::warn!(target: targets::COMMAND, "command runtime configured after first use");
            return Err(RuntimeError::AlreadyInitialized);
        }
        *CONFIG.lock() = Some(config);
        Ok(())
    }

    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let runtime = config
            .builder()
            .build()
            .map_err(|e| RuntimeError::CreationFailed(e.to_string()))?;
        let handle = runtime.handle().clone();

        let owner = match config.runtime_type {
            RuntimeType::MultiThreaded => Owner::Pool(runtime),
            RuntimeType::CurrentThread => {
                let (stop, stopped) = oneshot::channel::<()>();
                let thread = std::thread::Builder::new()
                    .name(config.thread_name.clone())
                    .spawn(move || {
                        runtime.block_on(async {
                            let _ = stopped.await;
                        });
                    })
                    .map_err(|e| RuntimeError::CreationFailed(e.to_string()))?;
                Owner::Driver { stop, thread }
            }
        };

        tracing::debug!(
            target: targets::COMMAND,
            runtime_type = ?config.runtime_type,
            thread_name = %config.thread_name,
            "command runtime created"
        );
        Ok(Self {
            handle,
            runtime_type: config.runtime_type,
            in_flight: Arc::new(AtomicU64::new(0)),
            owner,
        })
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Futures spawned through [`spawn`](Self::spawn) that have not finished.
    pub fn active_tasks(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `future` in the background.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let in_flight = InFlight::enter(&self.in_flight);
        self.handle.spawn(async move {
            let _in_flight = in_flight;
            future.await;
        });
    }

    /// Stop the scheduler. Pending commands are abandoned.
    pub fn shutdown(self) {
        match self.owner {
            Owner::Pool(runtime) => runtime.shutdown_background(),
            Owner::Driver { stop, thread } => {
                let _ = stop.send(());
                let _ = thread.join();
            }
        }
    }
}

/// Counts one spawned future until the task drops it, finished or not.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for CommandRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRuntime")
            .field("runtime_type", &self.runtime_type)
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Spawn on the caller's tokio runtime, or on the global one outside tokio.
pub(crate) fn spawn_detached<F>(future: F) -> Result<(), RuntimeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => CommandRuntime::global()?.spawn(future),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_config_setters() {
        let config = RuntimeConfig::current_thread()
            .with_thread_name("vm-commands")
            .with_time(false);
        assert_eq!(config.runtime_type, RuntimeType::CurrentThread);
        assert_eq!(config.thread_name, "vm-commands");
        assert!(!config.enable_time);

        let config = RuntimeConfig::multi_threaded().with_worker_threads(3);
        assert_eq!(config.runtime_type, RuntimeType::MultiThreaded);
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.thread_name, "presentation-commands");
    }

    #[test]
    fn test_pool_runs_spawned_futures() {
        let runtime = CommandRuntime::new(RuntimeConfig::multi_threaded().with_worker_threads(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        runtime.spawn(async move {
            let _ = tx.send("Nosgoth");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("Nosgoth"));
        assert_eq!(runtime.runtime_type(), RuntimeType::MultiThreaded);
        runtime.shutdown();
    }

    #[test]
    fn test_panicking_future_leaves_no_active_task() {
        let runtime = CommandRuntime::new(RuntimeConfig::multi_threaded().with_worker_threads(1)).unwrap();
        runtime.spawn(async {
            let reaver: Option<()> = None;
            reaver.expect("the Soul Reaver shattered");
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while runtime.active_tasks() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runtime.active_tasks(), 0);
        runtime.shutdown();
    }

    #[test]
    fn test_driver_thread_runs_spawned_futures() {
        let runtime = CommandRuntime::new(RuntimeConfig::current_thread()).unwrap();
        let (tx, rx) = mpsc::channel();
        runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("presentation-commands"));
        runtime.shutdown();
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RuntimeError::AlreadyInitialized.to_string(), "command runtime already initialized");
        assert!(RuntimeError::CreationFailed("io".into()).to_string().contains("io"));
    }
}
