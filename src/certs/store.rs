//! On-disk certificate store.
//!
//! Uses the certbot layout so the issuance collaborator and the proxy
//! agree on paths:
//!
//! ```text
//! {root}/live/{domain}/{fullchain,privkey,chain,cert}.pem
//! {root}/archive/{domain}/
//! {root}/renewal/{domain}.conf
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::certs::placeholder::PlaceholderCertificate;

pub const FULLCHAIN: &str = "fullchain.pem";
pub const PRIVKEY: &str = "privkey.pem";
pub const CHAIN: &str = "chain.pem";
pub const CERT: &str = "cert.pem";

/// All per-domain certificate artifacts.
pub const ARTIFACTS: [&str; 4] = [FULLCHAIN, PRIVKEY, CHAIN, CERT];

/// Certificate material rooted at a single directory.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the live material for `domain`.
    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join("live").join(domain)
    }

    fn archive_dir(&self, domain: &str) -> PathBuf {
        self.root.join("archive").join(domain)
    }

    fn renewal_conf(&self, domain: &str) -> PathBuf {
        self.root.join("renewal").join(format!("{}.conf", domain))
    }

    /// Replace whatever is in `live/{domain}` with the placeholder material.
    pub fn write_placeholder(&self, domain: &str, placeholder: &PlaceholderCertificate) -> io::Result<()> {
        let dir = self.domain_dir(domain);
        remove_path(&dir)?;
        std::fs::create_dir_all(&dir)?;

        // Self-signed: the certificate is its own chain.
        std::fs::write(dir.join(CERT), &placeholder.cert_pem)?;
        std::fs::write(dir.join(CHAIN), &placeholder.cert_pem)?;
        std::fs::write(dir.join(FULLCHAIN), &placeholder.cert_pem)?;
        write_private_key(&dir.join(PRIVKEY), &placeholder.key_pem)?;

        tracing::debug!(domain = %domain, dir = ?dir, "Placeholder material written");
        Ok(())
    }

    /// Delete all material for `domain`. Missing entries are ignored.
    pub fn remove(&self, domain: &str) -> io::Result<()> {
        for path in [
            self.domain_dir(domain),
            self.archive_dir(domain),
            self.renewal_conf(domain),
        ] {
            remove_path(&path)?;
        }
        Ok(())
    }

    /// Existing store entries for `domain`.
    pub fn generated_paths(&self, domain: &str) -> Vec<PathBuf> {
        [
            self.domain_dir(domain),
            self.archive_dir(domain),
            self.renewal_conf(domain),
        ]
        .into_iter()
        .filter(|p| p.symlink_metadata().is_ok())
        .collect()
    }

    /// Whether every artifact exists for `domain`.
    pub fn is_complete(&self, domain: &str) -> bool {
        let dir = self.domain_dir(domain);
        ARTIFACTS.iter().all(|name| dir.join(name).exists())
    }
}

/// Remove a file, symlink or directory tree; absent paths are fine.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(pem.as_bytes())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> io::Result<()> {
    std::fs::write(path, pem)
}
