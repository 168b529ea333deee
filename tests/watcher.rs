//! Config watcher cycles: lock gating, validation failures and debouncing.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use notify::event::{AccessKind, ModifyKind};
use notify::{Event, EventKind};
use tempfile::TempDir;
use tokio::sync::mpsc;

use proxy_certs::certs::lock::RenewalLock;
use proxy_certs::config::watcher::{ConfigWatcher, CycleOutcome};
use proxy_certs::config::AppConfig;
use proxy_certs::lifecycle::Shutdown;
use proxy_certs::proxy::ProxyController;

mod common;
use common::{entries, new_log, test_config, CallLog, FakeProxy, StaticProbe};

fn watcher(config: &AppConfig) -> (ConfigWatcher, Arc<FakeProxy>, CallLog) {
    let log = new_log();
    let proxy = Arc::new(FakeProxy::new(log.clone(), config));
    let controller = Arc::new(ProxyController::new(config, proxy.clone(), Arc::new(StaticProbe(true))));
    (ConfigWatcher::new(config, controller), proxy, log)
}

fn modify_event(config: &AppConfig) -> Event {
    Event::new(EventKind::Modify(ModifyKind::Any))
        .add_path(config.paths.template_dir.join("site.conf.template"))
}

#[tokio::test]
async fn test_cycle_reloads_with_fresh_config() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, _, log) = watcher(&config);

    assert_eq!(watcher.reload_cycle().await, CycleOutcome::Reloaded);
    assert_eq!(entries(&log), vec!["validate", "reload"]);
    assert_eq!(
        std::fs::read_to_string(config.paths.rendered_dir.join("site.conf"))
            .unwrap()
            .lines()
            .next(),
        Some("server_name example.com;")
    );
}

#[tokio::test]
async fn test_cycle_skipped_while_renewal_lock_held() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, _, log) = watcher(&config);
    let lock = RenewalLock::new(&config.paths.lock_file, config.renewal.lock_stale_after);
    let guard = lock.acquire().unwrap();

    assert_eq!(watcher.reload_cycle().await, CycleOutcome::SkippedLocked);
    assert!(entries(&log).is_empty());

    drop(guard);
    assert_eq!(watcher.reload_cycle().await, CycleOutcome::Reloaded);
}

#[tokio::test]
async fn test_stale_lock_does_not_block_reload() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, _, _) = watcher(&config);
    std::fs::write(&config.paths.lock_file, "left over by a crashed run").unwrap();

    assert_eq!(watcher.reload_cycle().await, CycleOutcome::Reloaded);
}

#[tokio::test]
async fn test_invalid_config_is_not_reloaded() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, proxy, log) = watcher(&config);
    let rendered = config.paths.rendered_dir.join("site.conf");
    std::fs::write(&rendered, "server_name running.example.com;\n").unwrap();
    proxy.invalid.store(true, Ordering::SeqCst);

    assert_eq!(watcher.reload_cycle().await, CycleOutcome::ValidationFailed);
    assert!(!entries(&log).contains(&"reload".to_string()));
    assert_eq!(
        std::fs::read_to_string(&rendered).unwrap(),
        "server_name running.example.com;\n"
    );
}

#[tokio::test]
async fn test_burst_of_events_yields_one_cycle() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    let (watcher, _, log) = watcher(&config);
    let watcher = Arc::new(watcher.with_outcome_sink(outcome_tx));

    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    let listener = shutdown.subscribe();
    let task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run_events(rx, listener).await })
    };

    for _ in 0..5 {
        tx.send(modify_event(&config)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap();
    assert_eq!(outcome, Some(CycleOutcome::Reloaded));

    shutdown.trigger();
    task.await.unwrap();

    assert!(outcomes.try_recv().is_err());
    assert_eq!(entries(&log).iter().filter(|e| *e == "reload").count(), 1);
}

#[tokio::test]
async fn test_access_events_are_ignored() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, _, log) = watcher(&config);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Event::new(EventKind::Access(AccessKind::Any))).unwrap();
    drop(tx);

    // Stream closes after the ignored event.
    let shutdown = Shutdown::new();
    watcher.run_events(rx, shutdown.subscribe()).await;
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_no_cycle_after_shutdown() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (watcher, _, log) = watcher(&config);

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(modify_event(&config)).unwrap();

    watcher.run_events(rx, shutdown.subscribe()).await;
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_template_change_on_disk_triggers_reload() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &["example.com"]);
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    let (watcher, _, _) = watcher(&config);
    let watcher = watcher.with_outcome_sink(outcome_tx);

    let shutdown = Shutdown::new();
    let task = tokio::spawn(watcher.run(shutdown.subscribe()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(
        config.paths.template_dir.join("site.conf.template"),
        "server_name ${DOMAIN} www.${DOMAIN};\n",
    )
    .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), outcomes.recv())
        .await
        .unwrap();
    assert_eq!(outcome, Some(CycleOutcome::Reloaded));
    assert_eq!(
        std::fs::read_to_string(config.paths.rendered_dir.join("site.conf")).unwrap(),
        "server_name example.com www.example.com;\n"
    );

    shutdown.trigger();
    task.await.unwrap().unwrap();
}
