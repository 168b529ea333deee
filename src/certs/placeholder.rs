//! Placeholder certificate generation.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use time::OffsetDateTime;

use crate::certs::classify::PLACEHOLDER_CN;

/// Self-signed key/certificate pair used until a real certificate is issued.
#[derive(Debug, Clone)]
pub struct PlaceholderCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a short-lived self-signed certificate with CN=`localhost`.
pub fn generate_placeholder(validity_days: i64) -> Result<PlaceholderCertificate, rcgen::Error> {
    let mut params = CertificateParams::new(vec![PLACEHOLDER_CN.to_string()])?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, PLACEHOLDER_CN);
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(validity_days);

    let key_pair = KeyPair::generate()?;
    let key_pem = key_pair.serialize_pem();
    let cert = params.self_signed(&key_pair)?;

    Ok(PlaceholderCertificate {
        cert_pem: cert.pem(),
        key_pem,
    })
}
