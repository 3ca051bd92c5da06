//! Software security store backing the crypto subsystem. A `Backend` owns the
//! certificate database (persistent or ephemeral), the list of loaded trust
//! modules, and any authenticated sessions. Module-list reads take a read
//! lock scoped to the scan; everything else is per-call state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{password_hash, Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// File name of the persistent certificate store inside a profile directory.
pub const STORE_FILE: &str = "cert-store.json";

const STORE_VERSION: u32 = 1;

/// Argon2id parameters for the key-database password. Matches the interactive
/// profile used elsewhere in the stack: 19 MiB memory, 3 iterations, 1 lane.
const KEY_DB_MEMORY_COST_KIB: u32 = 19 * 1024;
const KEY_DB_TIME_COST: u32 = 3;
const KEY_DB_PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile directory unusable: {0}")]
    ProfileUnusable(String),
    #[error("certificate store unreadable: {0}")]
    StoreUnreadable(String),
    #[error("certificate store corrupt: {0}")]
    StoreCorrupt(String),
    #[error("module spec invalid: {0}")]
    BadModuleSpec(String),
    #[error("module library unreadable: {0}")]
    LibraryUnreadable(String),
    #[error("key database hashing failed: {0}")]
    KeyDbHash(String),
}

/// One token slot exposed by a loaded module.
#[derive(Debug, Clone)]
pub struct Slot {
    pub present: bool,
    pub root_cert_count: usize,
}

impl Slot {
    pub fn has_root_certs(&self) -> bool {
        self.present && self.root_cert_count > 0
    }
}

/// A loadable unit exposing a trust anchor list. At most one module with a
/// given common name is registered at any time.
#[derive(Debug, Clone)]
pub struct TrustModule {
    pub common_name: String,
    pub library: PathBuf,
    pub slots: Vec<Slot>,
    pub loaded: bool,
}

/// Persistent shape of `cert-store.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default, rename = "keyDbPasswordHash")]
    key_db_password_hash: Option<String>,
}

#[derive(Debug)]
enum StoreMode {
    ReadWrite {
        dir: PathBuf,
        key_db_password_hash: Option<String>,
    },
    Ephemeral,
}

/// The initialized crypto backend. Constructed only by the lifecycle
/// bootstrap; shared immutably afterwards with interior locking.
#[derive(Debug)]
pub struct Backend {
    mode: StoreMode,
    modules: RwLock<Vec<TrustModule>>,
    sessions: Mutex<Vec<String>>,
    load_calls: AtomicU32,
    unload_calls: AtomicU32,
    closed: AtomicBool,
}

impl Backend {
    fn with_mode(mode: StoreMode) -> Self {
        Self {
            mode,
            modules: RwLock::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            load_calls: AtomicU32::new(0),
            unload_calls: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens a read-write certificate store rooted at an existing, readable
    /// profile directory. A fresh directory gets an empty store file; a
    /// corrupt store file is an error so the caller can fall back.
    pub fn open_read_write(dir: &Path) -> Result<Self, StoreError> {
        let meta = fs::metadata(dir)
            .map_err(|e| StoreError::ProfileUnusable(format!("{}: {e}", dir.display())))?;
        if !meta.is_dir() {
            return Err(StoreError::ProfileUnusable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let store_path = dir.join(STORE_FILE);
        let store = if store_path.exists() {
            let raw = fs::read_to_string(&store_path)
                .map_err(|e| StoreError::StoreUnreadable(format!("{e}")))?;
            serde_json::from_str::<StoreFile>(&raw)
                .map_err(|e| StoreError::StoreCorrupt(format!("{e}")))?
        } else {
            let fresh = StoreFile {
                version: STORE_VERSION,
                ..StoreFile::default()
            };
            let serialized = serde_json::to_string_pretty(&fresh)
                .map_err(|e| StoreError::StoreCorrupt(format!("{e}")))?;
            fs::write(&store_path, serialized).map_err(|e| {
                StoreError::ProfileUnusable(format!("cannot create {}: {e}", store_path.display()))
            })?;
            fresh
        };

        info!("opened read-write certificate store in {}", dir.display());
        Ok(Self::with_mode(StoreMode::ReadWrite {
            dir: dir.to_path_buf(),
            key_db_password_hash: store.key_db_password_hash,
        }))
    }

    /// Opens an in-memory store with no persistent database.
    pub fn open_ephemeral() -> Self {
        info!("opened ephemeral certificate store");
        Self::with_mode(StoreMode::Ephemeral)
    }

    pub fn profile_dir(&self) -> Option<&Path> {
        match &self.mode {
            StoreMode::ReadWrite { dir, .. } => Some(dir),
            StoreMode::Ephemeral => None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.mode, StoreMode::ReadWrite { .. })
    }

    /// Verifies the key-database password and opens a session on success.
    /// Ephemeral stores and stores without a password always refuse.
    pub fn authenticate(&self, password: &str) -> bool {
        let hash = match &self.mode {
            StoreMode::ReadWrite {
                key_db_password_hash: Some(hash),
                ..
            } => hash,
            _ => {
                warn!("no key database password is configured");
                return false;
            }
        };
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("stored key database hash is unusable: {err}");
                return false;
            }
        };
        let verifier = match key_db_argon2() {
            Ok(verifier) => verifier,
            Err(err) => {
                warn!("key database verifier unavailable: {err}");
                return false;
            }
        };
        if verifier.verify_password(password.as_bytes(), &parsed).is_ok() {
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push("key-db".to_string());
            info!("key database session opened");
            true
        } else {
            warn!("key database authentication failed");
            false
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Logs out every open session. Called from the finalize path.
    pub fn logout_all(&self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            info!("logged out {count} open sessions");
        } else {
            info!("no open sessions to log out");
        }
    }

    /// Runs a closure against the module list under the read lock. The lock
    /// is held only for the duration of the scan.
    pub fn with_module_list<R>(&self, scan: impl FnOnce(&[TrustModule]) -> R) -> R {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        scan(&modules)
    }

    pub fn find_module(&self, name: &str) -> Option<TrustModule> {
        self.with_module_list(|modules| {
            modules.iter().find(|m| m.common_name == name).cloned()
        })
    }

    /// Removes a module by common name. Returns `false` when no module with
    /// that name is registered.
    pub fn delete_module(&self, name: &str) -> bool {
        self.unload_calls.fetch_add(1, Ordering::Relaxed);
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let before = modules.len();
        modules.retain(|m| m.common_name != name);
        modules.len() != before
    }

    /// Unloads and destroys a module by common name. Returns `false` when
    /// the module was not registered.
    pub fn unload_module(&self, name: &str) -> bool {
        self.delete_module(name)
    }

    /// Loads a user module described by a spec string of the form
    /// `name="<common name>" library="<path>"`. The library is a PEM bundle;
    /// the module reports `loaded` only when at least one certificate parsed.
    pub fn load_user_module(&self, spec: &str, recurse: bool) -> Result<TrustModule, StoreError> {
        self.load_calls.fetch_add(1, Ordering::Relaxed);
        if recurse {
            return Err(StoreError::BadModuleSpec(
                "recursive module loading is not supported".to_string(),
            ));
        }

        let name = extract_quoted(spec, "name")
            .ok_or_else(|| StoreError::BadModuleSpec(format!("missing name in {spec:?}")))?;
        let library = extract_quoted(spec, "library")
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::BadModuleSpec(format!("missing library in {spec:?}")))?;

        let cert_count = count_pem_certificates(&library)?;
        let module = TrustModule {
            common_name: name,
            library,
            slots: vec![Slot {
                present: true,
                root_cert_count: cert_count,
            }],
            loaded: cert_count > 0,
        };

        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(module.clone());
        info!(
            "loaded user module \"{}\" with {cert_count} root certificates",
            module.common_name
        );
        Ok(module)
    }

    /// Shuts the store down. Unconditional; repeated calls are harmless.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        info!("certificate store shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn module_load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::Relaxed)
    }

    pub fn module_unload_calls(&self) -> u32 {
        self.unload_calls.load(Ordering::Relaxed)
    }
}

fn key_db_argon2() -> Result<Argon2<'static>, password_hash::Error> {
    let params = Params::new(KEY_DB_MEMORY_COST_KIB, KEY_DB_TIME_COST, KEY_DB_PARALLELISM, None)?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a key-database password into a PHC string suitable for the
/// `keyDbPasswordHash` field of `cert-store.json`.
pub fn hash_key_db_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = key_db_argon2().map_err(|e| StoreError::KeyDbHash(format!("{e}")))?;
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::KeyDbHash(format!("{e}")))?;
    Ok(hash.to_string())
}

fn extract_quoted(spec: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = spec.find(&marker)? + marker.len();
    let rest = &spec[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Counts the certificates in a PEM bundle. Blocks whose base64 body does
/// not decode are skipped with a warning rather than failing the load.
fn count_pem_certificates(path: &Path) -> Result<usize, StoreError> {
    let text = fs::read_to_string(path)
        .map_err(|e| StoreError::LibraryUnreadable(format!("{}: {e}", path.display())))?;

    let mut count = 0usize;
    let mut body = String::new();
    let mut inside = false;
    for line in text.lines() {
        let line = line.trim();
        if line == "-----BEGIN CERTIFICATE-----" {
            inside = true;
            body.clear();
            continue;
        }
        if line == "-----END CERTIFICATE-----" {
            let decoded = STANDARD.decode(body.as_bytes());
            if inside && decoded.map(|der| !der.is_empty()).unwrap_or(false) {
                count += 1;
            } else {
                warn!("skipping malformed certificate block in {}", path.display());
            }
            inside = false;
            continue;
        }
        if inside {
            body.push_str(line);
        }
    }
    Ok(count)
}
