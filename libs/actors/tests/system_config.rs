//! Building a system from a configuration file

use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use troupe::{Actor, ActorError, ActorSystem, RuntimeConfig};

struct Named {
    name: String,
}

impl Actor for Named {}

#[test]
fn test_system_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("troupe.toml");
    fs::write(
        &path,
        r#"
[scheduler]
worker_threads = 1
max_blocking_threads = 4
thread_name = "config-test"
deferred_poll_interval_ms = 5

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = RuntimeConfig::load(Some(&path), None).unwrap();
    assert_eq!(config.scheduler.max_blocking_threads, 4);
    assert_eq!(config.scheduler.deferred_wait_timeout_ms, 5000);

    let system = ActorSystem::from_config(&config).unwrap();
    assert_eq!(system.scheduler().settings().deferred_poll_interval, Duration::from_millis(5));

    let named = system.spawn(|| Named {
        name: "first".to_string(),
    });
    named.send(|n| n.name.push_str("-renamed")).unwrap();
    let (name, thread) = named
        .ask(|n| (n.name.clone(), std::thread::current().name().map(str::to_string)))
        .unwrap()
        .wait_timeout(Duration::from_secs(10))
        .unwrap();

    assert_eq!(name, "first-renamed");
    assert_eq!(thread.as_deref(), Some("config-test"));
}

#[test]
fn test_invalid_file_is_rejected_before_building() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("troupe.toml");
    fs::write(&path, "[scheduler]\nmax_blocking_threads = 0\n").unwrap();

    assert!(RuntimeConfig::load(Some(&path), None).is_err());

    let mut config = RuntimeConfig::default();
    config.scheduler.deferred_poll_interval_ms = 0;
    match ActorSystem::from_config(&config) {
        Err(ActorError::Configuration { message, .. }) => {
            assert!(message.contains("deferred_poll_interval_ms"));
        }
        other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
    }
}
