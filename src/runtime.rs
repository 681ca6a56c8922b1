//! Runtime abstraction layer for async operations
//!
//! Tile fetches run as spawned futures; the scheduler only ever sees an
//! [`AsyncSpawner`], so the same code runs on Tokio or on the deterministic
//! [`ManualSpawner`] used by headless hosts and tests.
//!
//! Network I/O always runs on a Tokio reactor. When the host has not entered
//! a runtime, the crate starts its own small background runtime on first use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use crate::prelude::{Arc, Future, Pin};
use crate::Result;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(&self, future: BoxFuture) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience wrapper for spawning without boxing at the call site
pub fn spawn_on<F>(spawner: &dyn AsyncSpawner, future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    spawner.spawn_boxed(Box::pin(future))
}

/// Spawner to use when the host does not provide one: the runtime entered on
/// this thread, otherwise the crate's background runtime.
#[cfg(feature = "tokio-runtime")]
pub fn default_spawner() -> Result<Arc<dyn AsyncSpawner>> {
    if let Some(spawner) = TokioSpawner::current() {
        return Ok(Arc::new(spawner));
    }
    log::debug!("no tokio runtime entered, tile loads run on the background runtime");
    Ok(Arc::new(TokioSpawner::new(background_handle()?)))
}

#[cfg(not(feature = "tokio-runtime"))]
pub fn default_spawner() -> Result<Arc<dyn AsyncSpawner>> {
    Err(crate::Error::Runtime(
        "no async runtime compiled in; provide a spawner with TileEngineBuilder::with_spawner".into(),
    ))
}

/// Run `future` on a Tokio reactor and wait for its result from any executor.
#[cfg(feature = "tokio-runtime")]
pub async fn run_io<T, F>(future: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    background_handle()?
        .spawn(future)
        .await
        .map_err(|e| crate::Error::Runtime(format!("I/O task failed: {}", e)))?
}

#[cfg(not(feature = "tokio-runtime"))]
pub async fn run_io<T, F>(_future: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    Err(crate::Error::Runtime(
        "network I/O needs the tokio-runtime feature".into(),
    ))
}

/// Run CPU-heavy `work` off the async worker threads when inside Tokio,
/// inline otherwise.
pub async fn run_blocking<T, W>(work: W) -> Result<T>
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
{
    #[cfg(feature = "tokio-runtime")]
    {
        if let Ok(handle) = ::tokio::runtime::Handle::try_current() {
            return handle
                .spawn_blocking(work)
                .await
                .map_err(|e| crate::Error::Runtime(format!("blocking task failed: {}", e)));
        }
    }
    Ok(work())
}

#[cfg(feature = "tokio-runtime")]
pub use tokio_impl::{background_handle, TokioSpawner};

#[cfg(feature = "tokio-runtime")]
mod tokio_impl {
    use super::*;
    use ::tokio::runtime::{Builder, Handle, Runtime};
    use ::tokio::task::JoinHandle;
    use once_cell::sync::Lazy;

    static BACKGROUND: Lazy<std::result::Result<Runtime, String>> = Lazy::new(|| {
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tilescope-io")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
    });

    /// Handle of the crate-owned runtime, started on first use and never shut down.
    pub fn background_handle() -> Result<Handle> {
        match &*BACKGROUND {
            Ok(runtime) => Ok(runtime.handle().clone()),
            Err(e) => Err(crate::Error::Runtime(format!("background runtime failed to start: {}", e))),
        }
    }

    /// Tokio-based async spawner
    #[derive(Debug, Clone)]
    pub struct TokioSpawner {
        handle: Handle,
    }

    impl TokioSpawner {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// Spawner for the runtime entered on this thread, if any.
        pub fn current() -> Option<Self> {
            Handle::try_current().ok().map(Self::new)
        }
    }

    impl AsyncSpawner for TokioSpawner {
        fn spawn_boxed(&self, future: BoxFuture) -> Box<dyn AsyncHandle> {
            Box::new(TokioHandle(self.handle.spawn(future)))
        }
    }

    struct TokioHandle(JoinHandle<()>);

    impl AsyncHandle for TokioHandle {
        fn is_finished(&self) -> bool {
            self.0.is_finished()
        }

        fn cancel(&self) {
            self.0.abort();
        }
    }
}

#[derive(Debug, Default)]
struct TaskState {
    finished: AtomicBool,
    cancelled: AtomicBool,
}

struct ParkedTask {
    future: BoxFuture,
    state: Arc<TaskState>,
}

/// Deterministic spawner: futures are parked until the host calls
/// [`ManualSpawner::run_until_stalled`].
#[derive(Clone, Default)]
pub struct ManualSpawner {
    parked: Arc<Mutex<Vec<ParkedTask>>>,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ParkedTask>> {
        self.parked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Poll every parked task until none of them can make progress.
    /// Returns how many tasks ran to completion.
    pub fn run_until_stalled(&self) -> usize {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut completed = 0;

        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                break;
            }

            let mut progressed = false;
            let mut still_pending = Vec::new();
            for mut task in batch {
                if task.state.cancelled.load(Ordering::Acquire) {
                    task.state.finished.store(true, Ordering::Release);
                    progressed = true;
                    continue;
                }
                match task.future.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => {
                        task.state.finished.store(true, Ordering::Release);
                        completed += 1;
                        progressed = true;
                    }
                    Poll::Pending => still_pending.push(task),
                }
            }

            let mut parked = self.lock();
            let spawned_more = !parked.is_empty();
            parked.extend(still_pending);
            if !progressed && !spawned_more {
                break;
            }
        }
        completed
    }
}

impl AsyncSpawner for ManualSpawner {
    fn spawn_boxed(&self, future: BoxFuture) -> Box<dyn AsyncHandle> {
        let state = Arc::new(TaskState::default());
        self.lock().push(ParkedTask {
            future,
            state: state.clone(),
        });
        Box::new(ManualHandle(state))
    }
}

struct ManualHandle(Arc<TaskState>);

impl AsyncHandle for ManualHandle {
    fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }
}
