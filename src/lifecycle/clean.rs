//! Removal of previously generated state (`--clean`).

use std::io;
use std::path::PathBuf;

use crate::certs::lock::{LockState, RenewalLock};
use crate::certs::store::{remove_path, CertificateStore};
use crate::config::schema::AppConfig;
use crate::proxy::template::template_targets;

/// Existing generated paths: certificate material, rendered configs and a
/// lock marker no live process owns.
pub fn generated_state(config: &AppConfig) -> io::Result<Vec<PathBuf>> {
    let store = CertificateStore::new(&config.paths.cert_root);
    let mut paths: Vec<PathBuf> = config
        .domains
        .iter()
        .flat_map(|domain| store.generated_paths(domain))
        .collect();

    for (_, target) in template_targets(&config.paths.template_dir, &config.paths.rendered_dir)? {
        if target.exists() {
            paths.push(target);
        }
    }

    let lock = RenewalLock::new(&config.paths.lock_file, config.renewal.lock_stale_after);
    if let LockState::Stale { .. } = lock.state() {
        paths.push(lock.path().to_path_buf());
    }

    Ok(paths)
}

/// Delete every path in `paths`.
pub fn remove_generated_state(paths: &[PathBuf]) -> io::Result<()> {
    for path in paths {
        remove_path(path)?;
        tracing::info!(path = ?path, "Removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::placeholder::generate_placeholder;
    use tempfile::TempDir;

    #[test]
    fn test_generated_state_lists_and_removes() {
        let tmp = TempDir::new().unwrap();
        let mut config = AppConfig::with_domains(["example.com", "other.example.com"]);
        config.paths.cert_root = tmp.path().join("letsencrypt");
        config.paths.template_dir = tmp.path().join("templates");
        config.paths.rendered_dir = tmp.path().join("conf.d");
        config.paths.lock_file = tmp.path().join("renewal.lock");

        let store = CertificateStore::new(&config.paths.cert_root);
        store
            .write_placeholder("example.com", &generate_placeholder(1).unwrap())
            .unwrap();
        std::fs::create_dir_all(&config.paths.template_dir).unwrap();
        std::fs::create_dir_all(&config.paths.rendered_dir).unwrap();
        std::fs::write(config.paths.template_dir.join("site.conf.template"), "x").unwrap();
        std::fs::write(config.paths.rendered_dir.join("site.conf"), "x").unwrap();
        std::fs::write(config.paths.rendered_dir.join("hand-written.conf"), "x").unwrap();
        std::fs::write(&config.paths.lock_file, "garbage").unwrap();

        let paths = generated_state(&config).unwrap();
        assert_eq!(paths.len(), 3);

        remove_generated_state(&paths).unwrap();
        assert!(generated_state(&config).unwrap().is_empty());
        assert!(config.paths.rendered_dir.join("hand-written.conf").exists());
    }

    #[test]
    fn test_held_lock_is_not_listed() {
        let tmp = TempDir::new().unwrap();
        let mut config = AppConfig::with_domains(["example.com"]);
        config.paths.cert_root = tmp.path().join("letsencrypt");
        config.paths.template_dir = tmp.path().join("templates");
        config.paths.lock_file = tmp.path().join("renewal.lock");

        let lock = RenewalLock::new(&config.paths.lock_file, config.renewal.lock_stale_after);
        let _guard = lock.acquire().unwrap();

        assert!(generated_state(&config).unwrap().is_empty());
    }
}
