//! Certificate-store profile discovery. A profile is a directory holding a
//! persistent certificate database; resolution walks a strict priority order
//! and treats "no profile at all" as a normal outcome rather than an error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

/// Environment variable naming a certificate folder that overrides every
/// other profile source.
pub const CERTIFICATE_FOLDER_VAR: &str = "TRUSTCORE_CERTIFICATE_FOLDER";

/// Environment variable pointing at the persisted settings file.
pub const CONFIG_PATH_VAR: &str = "TRUSTCORE_CONFIG";

/// Product families probed when asking an external discovery collaborator
/// for an existing profile, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProductFamily {
    Mail,
    Browser,
    Suite,
}

pub const DISCOVERY_ORDER: [ProductFamily; 3] = [
    ProductFamily::Mail,
    ProductFamily::Browser,
    ProductFamily::Suite,
];

/// External collaborator that knows where installed products keep their
/// certificate profiles. Hosts register an implementation; absence of one
/// simply skips this resolution step.
pub trait ProfileDiscovery: Send + Sync {
    /// Name of the default profile for a product family, if any.
    fn default_profile(&self, family: ProductFamily) -> Option<String>;

    /// Filesystem path of a named profile for a product family.
    fn profile_path(&self, family: ProductFamily, profile: &str) -> Option<PathBuf>;
}

/// Everything the backend bootstrap needs from its host: where to look for
/// the environment override, the persisted settings file, and an optional
/// profile-discovery collaborator.
#[derive(Clone)]
pub struct BackendContext {
    pub certificate_folder_var: String,
    pub config_path: Option<PathBuf>,
    pub discovery: Option<Arc<dyn ProfileDiscovery>>,
}

impl Default for BackendContext {
    fn default() -> Self {
        Self {
            certificate_folder_var: CERTIFICATE_FOLDER_VAR.to_string(),
            config_path: env::var_os(CONFIG_PATH_VAR).map(PathBuf::from),
            discovery: None,
        }
    }
}

/// Settings file shape. Only the certificate directory is read here; the
/// file may carry unrelated host configuration.
#[derive(Debug, Deserialize)]
struct Settings {
    security: Option<SecuritySettings>,
}

#[derive(Debug, Deserialize)]
struct SecuritySettings {
    scripting: Option<ScriptingSettings>,
}

#[derive(Debug, Deserialize)]
struct ScriptingSettings {
    #[serde(rename = "certificateDir")]
    certificate_dir: Option<String>,
}

/// Reads the persisted certificate directory. Every failure is swallowed and
/// reported as "no value found" so a broken settings file never blocks
/// backend initialization.
fn configured_certificate_dir(path: &Path) -> Option<String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("settings file {} unreadable: {err}", path.display());
            return None;
        }
    };
    let settings: Settings = match serde_json::from_str(&raw) {
        Ok(settings) => settings,
        Err(err) => {
            warn!("settings file {} unparsable: {err}", path.display());
            return None;
        }
    };
    settings
        .security?
        .scripting?
        .certificate_dir
        .filter(|dir| !dir.is_empty())
}

/// Resolves the certificate-store profile directory. First match wins:
/// environment override, persisted settings, discovery collaborator, none.
pub fn locate_profile(ctx: &BackendContext) -> Option<PathBuf> {
    if let Ok(folder) = env::var(&ctx.certificate_folder_var) {
        if !folder.is_empty() {
            info!(
                "using certificate folder from {}={folder}",
                ctx.certificate_folder_var
            );
            return Some(PathBuf::from(folder));
        }
    }

    if let Some(path) = &ctx.config_path {
        if let Some(dir) = configured_certificate_dir(path) {
            info!(
                "using certificate folder from settings file {}: {dir}",
                path.display()
            );
            return Some(PathBuf::from(dir));
        }
    }

    if let Some(discovery) = &ctx.discovery {
        for family in DISCOVERY_ORDER {
            let Some(profile) = discovery.default_profile(family) else {
                continue;
            };
            if profile.is_empty() {
                continue;
            }
            if let Some(path) = discovery.profile_path(family, &profile) {
                info!("using discovered {family:?} profile {}", path.display());
                return Some(path);
            }
        }
    }

    info!("no certificate profile found");
    None
}
