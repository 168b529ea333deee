//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use proxy_certs::certs::issuer::{IssuanceError, IssueRequest, Issuer};
use proxy_certs::certs::store::{CertificateStore, CERT, CHAIN, FULLCHAIN, PRIVKEY};
use proxy_certs::config::AppConfig;
use proxy_certs::proxy::process::{ProxyError, ProxyProcess, ReadinessProbe};

/// Ordered record of calls made on the fakes.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Config rooted in `tmp` with fast readiness polling and a short debounce.
pub fn test_config(tmp: &TempDir, domains: &[&str]) -> AppConfig {
    let mut config = AppConfig::with_domains(domains.iter().copied());
    let root = tmp.path();
    config.paths.cert_root = root.join("letsencrypt");
    config.paths.webroot = root.join("webroot");
    config.paths.template_dir = root.join("templates");
    config.paths.rendered_dir = root.join("conf.d");
    config.paths.main_config = root.join("nginx.conf");
    config.paths.lock_file = root.join("renewal.lock");
    config.readiness.interval = Duration::from_millis(10);
    config.readiness.timeout = Duration::from_secs(2);
    config.watch.debounce = Duration::from_millis(50);
    config.env.insert("DOMAIN".into(), domains.first().copied().unwrap_or_default().into());

    std::fs::create_dir_all(&config.paths.template_dir).unwrap();
    std::fs::create_dir_all(&config.paths.rendered_dir).unwrap();
    std::fs::write(
        config.paths.template_dir.join("site.conf.template"),
        "server_name ${DOMAIN};\nssl_certificate /etc/letsencrypt/live/${DOMAIN}/fullchain.pem;\n",
    )
    .unwrap();
    std::fs::write(&config.paths.main_config, "events {}\n").unwrap();
    config
}

/// Write a self-signed certificate with `cn` expiring in `days_left` days.
pub fn write_cert(dir: &Path, cn: &str, days_left: i64) {
    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::new(vec![cn.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.not_before = now - time::Duration::days(30);
    // Half a day of slack so floor-division lands on `days_left`.
    params.not_after = now + time::Duration::days(days_left) + time::Duration::hours(12);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();

    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(FULLCHAIN), cert.pem()).unwrap();
    std::fs::write(dir.join(CERT), cert.pem()).unwrap();
    std::fs::write(dir.join(CHAIN), cert.pem()).unwrap();
    std::fs::write(dir.join(PRIVKEY), key.serialize_pem()).unwrap();
}

/// Proxy fake that records calls and, on start, how many domains had
/// complete certificate material. Starting it twice fails like a second
/// nginx binding the same port.
pub struct FakeProxy {
    log: CallLog,
    store: CertificateStore,
    domains: Vec<String>,
    pub invalid: AtomicBool,
    pub running: AtomicBool,
    pub complete_at_start: Mutex<Option<usize>>,
}

impl FakeProxy {
    pub fn new(log: CallLog, config: &AppConfig) -> Self {
        Self {
            log,
            store: CertificateStore::new(&config.paths.cert_root),
            domains: config.domains.clone(),
            invalid: AtomicBool::new(false),
            running: AtomicBool::new(false),
            complete_at_start: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProxyProcess for FakeProxy {
    async fn start(&self) -> Result<(), ProxyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::Command {
                command: "nginx".into(),
                status: 1,
                output: "bind() to 0.0.0.0:80 failed (98: Address already in use)".into(),
            });
        }
        let complete = self
            .domains
            .iter()
            .filter(|d| self.store.is_complete(d))
            .count();
        *self.complete_at_start.lock().unwrap() = Some(complete);
        self.log.lock().unwrap().push("start".into());
        Ok(())
    }

    async fn validate(&self) -> Result<(), ProxyError> {
        self.log.lock().unwrap().push("validate".into());
        if self.invalid.load(Ordering::SeqCst) {
            Err(ProxyError::Validation("unexpected \"}\" in site.conf:1".into()))
        } else {
            Ok(())
        }
    }

    async fn reload(&self) -> Result<(), ProxyError> {
        self.log.lock().unwrap().push("reload".into());
        Ok(())
    }
}

/// Probe that is reachable immediately, or never.
pub struct StaticProbe(pub bool);

#[async_trait]
impl ReadinessProbe for StaticProbe {
    async fn is_reachable(&self, _url: &Url) -> bool {
        self.0
    }
}

/// Probe reachable exactly while the fake proxy is running.
pub struct RunningProbe(pub Arc<FakeProxy>);

#[async_trait]
impl ReadinessProbe for RunningProbe {
    async fn is_reachable(&self, _url: &Url) -> bool {
        self.0.running.load(Ordering::SeqCst)
    }
}

/// Issuer fake writing a 90-day certificate for the requested domain.
pub struct RecordingIssuer {
    log: CallLog,
    store: CertificateStore,
    failing: Mutex<HashSet<String>>,
}

impl RecordingIssuer {
    pub fn new(log: CallLog, config: &AppConfig) -> Self {
        Self {
            log,
            store: CertificateStore::new(&config.paths.cert_root),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make issuance for `domain` fail with a rate-limit error.
    pub fn fail_for(&self, domain: &str) {
        self.failing.lock().unwrap().insert(domain.to_string());
    }
}

#[async_trait]
impl Issuer for RecordingIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuanceError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("issue:{}", request.domain));

        if self.failing.lock().unwrap().contains(&request.domain) {
            return Err(IssuanceError::RateLimited("too many certificates already issued".into()));
        }
        write_cert(&self.store.domain_dir(&request.domain), &request.domain, 89);
        Ok(())
    }
}

/// Start a server answering every request with `status`.
pub async fn start_status_server(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}
