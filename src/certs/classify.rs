//! Certificate state classification.
//!
//! Classification is derived from the leaf certificate in
//! `{dir}/fullchain.pem` on every call and never cached: the files can be
//! replaced underneath us by an external renewal.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::parse_x509_certificate;

use crate::certs::store::FULLCHAIN;

/// Common name carried by placeholder certificates.
pub const PLACEHOLDER_CN: &str = "localhost";

/// Default renewal margin in days.
pub const DEFAULT_MARGIN_DAYS: i64 = 7;

const SECS_PER_DAY: i64 = 86_400;

/// Classification of a domain's current certificate material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateState {
    /// No certificate file.
    Missing,
    /// Self-signed stand-in (CN=`localhost`).
    Placeholder,
    /// Fewer than the margin days of validity left.
    ExpiringSoon { days_left: i64 },
    /// Production certificate with enough validity left.
    Valid { days_left: i64 },
}

impl CertificateState {
    /// Whether the domain needs a real certificate issued.
    pub fn needs_issuance(&self) -> bool {
        !matches!(self, CertificateState::Valid { .. })
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateState::Missing => "missing",
            CertificateState::Placeholder => "placeholder",
            CertificateState::ExpiringSoon { .. } => "expiring-soon",
            CertificateState::Valid { .. } => "valid",
        }
    }
}

impl fmt::Display for CertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A present certificate that could not be read or parsed.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificate found in {0:?}")]
    NoCertificate(PathBuf),

    #[error("malformed certificate in {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Facts extracted from a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    /// Expiration as seconds since the Unix epoch.
    pub not_after: i64,
}

/// Classify the certificate in `dir` against the current time.
pub fn classify(dir: &Path, margin_days: i64) -> Result<CertificateState, ClassifyError> {
    classify_at(dir, OffsetDateTime::now_utc(), margin_days)
}

/// Classify the certificate in `dir` as of `now`.
pub fn classify_at(
    dir: &Path,
    now: OffsetDateTime,
    margin_days: i64,
) -> Result<CertificateState, ClassifyError> {
    let path = dir.join(FULLCHAIN);
    if !path.exists() {
        return Ok(CertificateState::Missing);
    }

    let info = read_certificate(&path)?;
    Ok(classify_info(&info, now, margin_days))
}

/// Pure classification rule.
pub fn classify_info(info: &CertificateInfo, now: OffsetDateTime, margin_days: i64) -> CertificateState {
    if info.common_name.as_deref() == Some(PLACEHOLDER_CN) {
        return CertificateState::Placeholder;
    }

    let days_left = (info.not_after - now.unix_timestamp()).div_euclid(SECS_PER_DAY);
    if days_left < margin_days {
        CertificateState::ExpiringSoon { days_left }
    } else {
        CertificateState::Valid { days_left }
    }
}

/// Parse the first certificate of a PEM chain file.
pub fn read_certificate(path: &Path) -> Result<CertificateInfo, ClassifyError> {
    let file = std::fs::File::open(path).map_err(|source| ClassifyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let der = match rustls_pemfile::certs(&mut reader).next() {
        Some(Ok(der)) => der,
        Some(Err(e)) => {
            return Err(ClassifyError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        None => return Err(ClassifyError::NoCertificate(path.to_path_buf())),
    };

    let (_, x509) = parse_x509_certificate(der.as_ref()).map_err(|e| ClassifyError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let common_name = x509
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    Ok(CertificateInfo {
        common_name,
        not_after: x509.validity().not_after.timestamp(),
    })
}
