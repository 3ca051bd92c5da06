//! Exactly-once initialization and teardown of the crypto backend. The
//! outcome of the first initialization, success or failure, is final for the
//! rest of the process; every later caller observes that same outcome.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{info, warn};

use crate::backend::Backend;
use crate::module;
use crate::profile::{self, BackendContext};

/// Double-checked initialization state. Instantiable so tests can exercise
/// the race and failure paths; production code goes through the process-wide
/// instance behind [`ensure_initialized`] and [`shutdown`].
pub struct Lifecycle {
    decided: AtomicBool,
    succeeded: AtomicBool,
    gate: Mutex<()>,
    attempts: AtomicU32,
    finalize_armed: AtomicBool,
    finalize_registrations: AtomicU32,
    finalize_done: AtomicBool,
    backend: OnceLock<Backend>,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            decided: AtomicBool::new(false),
            succeeded: AtomicBool::new(false),
            gate: Mutex::new(()),
            attempts: AtomicU32::new(0),
            finalize_armed: AtomicBool::new(false),
            finalize_registrations: AtomicU32::new(0),
            finalize_done: AtomicBool::new(false),
            backend: OnceLock::new(),
        }
    }

    /// Initializes the backend through the default bootstrap. Idempotent and
    /// safe under concurrent first-call races; the mutex is taken only on
    /// the slow path.
    pub fn ensure_initialized(&self, ctx: &BackendContext) -> bool {
        self.ensure_initialized_with(|| bootstrap(ctx))
    }

    /// Same contract with an explicit bootstrap. The bootstrap runs at most
    /// once per process no matter how many callers race.
    pub fn ensure_initialized_with<F>(&self, bootstrap: F) -> bool
    where
        F: FnOnce() -> Option<Backend>,
    {
        if self.decided.load(Ordering::Acquire) {
            return self.succeeded.load(Ordering::Acquire);
        }

        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.decided.load(Ordering::Acquire) {
            return self.succeeded.load(Ordering::Acquire);
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = bootstrap();
        let succeeded = outcome.is_some();
        if let Some(backend) = outcome {
            let _ = self.backend.set(backend);
            if !self.finalize_armed.swap(true, Ordering::AcqRel) {
                self.finalize_registrations.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            warn!("backend initialization failed; not attempting again this process");
        }

        self.succeeded.store(succeeded, Ordering::Release);
        self.decided.store(true, Ordering::Release);
        succeeded
    }

    /// The initialized backend, if initialization has succeeded.
    pub fn backend(&self) -> Option<&Backend> {
        self.backend.get()
    }

    /// How many times the underlying bootstrap actually ran.
    pub fn init_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// How many times the finalize path was armed. At most 1 by contract.
    pub fn finalize_registrations(&self) -> u32 {
        self.finalize_registrations.load(Ordering::Relaxed)
    }

    /// Orderly teardown. Runs the finalize routine once, and only when
    /// initialization previously reached success. Skipping this on abnormal
    /// termination is acceptable; nothing here is required for correctness
    /// of the next process.
    pub fn shutdown(&self) {
        if !self.finalize_armed.load(Ordering::Acquire) {
            info!("backend was never initialized; nothing to shut down");
            return;
        }
        if self.finalize_done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(backend) = self.backend.get() {
            finalize(backend);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Full backend bootstrap: profile discovery, store initialization with
/// fallback, then best-effort trust module loading.
fn bootstrap(ctx: &BackendContext) -> Option<Backend> {
    let profile_dir = profile::locate_profile(ctx);

    let mut backend = None;
    if let Some(dir) = &profile_dir {
        match Backend::open_read_write(dir) {
            Ok(opened) => backend = Some(opened),
            Err(err) => info!("initializing backend with profile failed: {err}"),
        }
    }
    let backend = match backend {
        Some(opened) => opened,
        None => {
            info!("initializing backend without profile");
            Backend::open_ephemeral()
        }
    };

    if !module::ensure_root_module_loaded(&backend) {
        warn!("root certificate module unavailable; continuing without it");
    }

    Some(backend)
}

/// Finalize routine: unload the trust module, close sessions, shut the
/// store down unconditionally.
fn finalize(backend: &Backend) {
    if backend.find_module(module::ROOT_MODULE_NAME).is_some() {
        if backend.unload_module(module::ROOT_MODULE_NAME) {
            info!("unloaded module \"{}\"", module::ROOT_MODULE_NAME);
        } else {
            warn!("failed to unload module \"{}\"", module::ROOT_MODULE_NAME);
        }
    } else {
        info!(
            "module \"{}\" was not loaded; nothing to unload",
            module::ROOT_MODULE_NAME
        );
    }
    backend.logout_all();
    backend.shutdown();
}

static LIFECYCLE: Lifecycle = Lifecycle::new();

pub(crate) fn global() -> &'static Lifecycle {
    &LIFECYCLE
}

/// Process-wide idempotent backend initialization.
pub fn ensure_initialized(ctx: &BackendContext) -> bool {
    LIFECYCLE.ensure_initialized(ctx)
}

/// The process-wide backend, once the global initialization has succeeded.
pub fn global_backend() -> Option<&'static Backend> {
    LIFECYCLE.backend()
}

/// Process-wide orderly teardown. The host calls this once; calling it
/// without a successful initialization is a no-op.
pub fn shutdown() {
    LIFECYCLE.shutdown()
}
