//! Process-wide setup of the engine.
//!
//! Every engine operation runs on one shared tokio runtime per process. The
//! runtime is created by the first [`acquire`] call and torn down when the
//! last [`RuntimeGuard`] is dropped, a later [`acquire`] starts a fresh one.
//! Engine entry points take a `&RuntimeGuard`, so nothing can run before init.

use std::{
    future::Future,
    sync::{Arc, Weak},
};

use log::info;
use parking_lot::{Mutex, const_mutex};
use tokio::runtime::{Builder, Runtime};

use crate::{EngineError, Result};

static RUNTIME: Mutex<Weak<Runtime>> = const_mutex(Weak::new());

/// A live reference to the process-wide engine runtime.
#[derive(Debug, Clone)]
pub struct RuntimeGuard {
    runtime: Option<Arc<Runtime>>,
}

/// Initializes the process-wide runtime if needed and returns a guard sharing it.
///
/// # Returns
/// A guard keeping the runtime alive, or `EngineError::Runtime` if it couldn't be built.
pub fn acquire() -> Result<RuntimeGuard> {
    let mut slot = RUNTIME.lock();

    if let Some(runtime) = slot.upgrade() {
        return Ok(RuntimeGuard {
            runtime: Some(runtime),
        });
    }

    let runtime = Builder::new_multi_thread()
        .thread_name("engine-io")
        .enable_all()
        .build()
        .map_err(EngineError::Runtime)?;

    let runtime = Arc::new(runtime);
    *slot = Arc::downgrade(&runtime);
    info!("engine runtime initialized");

    Ok(RuntimeGuard {
        runtime: Some(runtime),
    })
}

/// Whether some guard currently keeps the runtime alive.
pub fn is_initialized() -> bool {
    RUNTIME.lock().strong_count() > 0
}

impl RuntimeGuard {
    /// Drives `fut` to completion on the shared runtime, blocking the calling thread.
    ///
    /// Must not be called from within an async context.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle().block_on(fut)
    }

    fn handle(&self) -> &Runtime {
        // Only `drop` takes the runtime out.
        match &self.runtime {
            Some(runtime) => runtime,
            None => unreachable!("runtime guard used after drop"),
        }
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        // The last reference is released under the lock so `acquire` never
        // upgrades a runtime that is being shut down.
        let _slot = RUNTIME.lock();
        if let Some(runtime) = self.runtime.take().and_then(Arc::into_inner) {
            drop(runtime);
            info!("engine runtime torn down");
        }
    }
}
