//! Root-certificate trust module management. Ensures exactly one root-certs
//! module is registered in the backend's module list, replacing stale modules
//! left behind by earlier runs or other installations.

use std::env;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::backend::Backend;

/// Symbolic name of the root-certificate module this crate manages.
pub const ROOT_MODULE_NAME: &str = "Root Certs for Trustcore";

/// File name of the root-certificate bundle.
pub const ROOT_BUNDLE_FILE: &str = "root-certs.pem";

/// Placeholder variable expanded into the vendor library directory.
pub const VENDOR_DIR_VAR: &str = "TRUSTCORE_VENDOR_DIR";

#[cfg(feature = "system-roots")]
const SYSTEM_BUNDLE_DIRS: [&str; 3] = [
    "/etc/ssl/certs",
    "/etc/pki/tls/certs",
    "/usr/share/ca-certificates",
];

/// Makes sure a module exposing root certificates is loaded. Idempotent: a
/// slot that already reports root certificates short-circuits without any
/// load or unload call. Failure is reported to the caller and logged, but
/// digest and cipher operations do not depend on it.
pub fn ensure_root_module_loaded(backend: &Backend) -> bool {
    let already = backend.with_module_list(|modules| {
        modules.iter().find_map(|module| {
            module
                .slots
                .iter()
                .any(|slot| slot.has_root_certs())
                .then(|| (module.common_name.clone(), module.library.clone()))
        })
    });
    if let Some((name, library)) = already {
        info!(
            "root certificates module \"{name}\" is already loaded: {}",
            library.display()
        );
        return true;
    }

    if backend.find_module(ROOT_MODULE_NAME).is_some() {
        if backend.delete_module(ROOT_MODULE_NAME) {
            info!("deleted stale module \"{ROOT_MODULE_NAME}\"");
        } else {
            warn!("failed to delete stale module \"{ROOT_MODULE_NAME}\"");
        }
    }

    let template = root_bundle_template();
    let expanded = expand_placeholders(&template);
    let Some(path) = resolve_bundle_path(&expanded) else {
        warn!("root certificate bundle {expanded} not found; trust module left unloaded");
        return false;
    };

    let spec = format!("name=\"{ROOT_MODULE_NAME}\" library=\"{}\"", path.display());
    match backend.load_user_module(&spec, false) {
        Ok(module) if module.loaded => {
            info!(
                "added root certificate module \"{ROOT_MODULE_NAME}\" from {}",
                path.display()
            );
            true
        }
        Ok(_) => {
            warn!(
                "root certificate module from {} reported no certificates",
                path.display()
            );
            false
        }
        Err(err) => {
            warn!("failed to load root certificate module: {err}");
            false
        }
    }
}

#[cfg(feature = "system-roots")]
fn root_bundle_template() -> String {
    ROOT_BUNDLE_FILE.to_string()
}

#[cfg(not(feature = "system-roots"))]
fn root_bundle_template() -> String {
    format!("${{{VENDOR_DIR_VAR}}}/{ROOT_BUNDLE_FILE}")
}

/// Expands `${VAR}` placeholders from the environment. Unset variables
/// expand to nothing and are logged.
pub(crate) fn expand_placeholders(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        match env::var(var) {
            Ok(value) => out.push_str(&value),
            Err(_) => warn!("placeholder ${{{var}}} is not set"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(feature = "system-roots")]
fn resolve_bundle_path(name: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        return fs::canonicalize(&candidate).ok();
    }
    SYSTEM_BUNDLE_DIRS
        .iter()
        .map(|dir| PathBuf::from(dir).join(name))
        .find_map(|path| fs::canonicalize(path).ok())
}

#[cfg(not(feature = "system-roots"))]
fn resolve_bundle_path(name: &str) -> Option<PathBuf> {
    fs::canonicalize(PathBuf::from(name)).ok()
}
