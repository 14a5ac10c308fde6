//! Lifecycle tests against small shell scripts standing in for the server binary

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use disposable_server::core::{
    InstanceManager, InstanceStatus, LaunchError, ReplicationError, SupervisorConfig,
};
use disposable_server::platform;
use tempfile::TempDir;

/// Write an executable `/bin/sh` script into `dir`
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn manager(dir: &TempDir, binary: PathBuf) -> InstanceManager {
    let mut config = SupervisorConfig::default()
        .with_binary_path(binary)
        .with_scratch_dir(dir.path());
    config.port_retries = 3;
    config.replica_ready_timeout_ms = 30;
    InstanceManager::with_seed(config, 7)
}

/// Script that records its PID and arguments, then sleeps without listening
fn sleeper(dir: &TempDir) -> PathBuf {
    let record = dir.path().join("record");
    script(
        dir.path(),
        "sleeper.sh",
        &format!(
            "echo \"$$ $@\" >> {}\nexec sleep 30",
            record.display()
        ),
    )
}

fn recorded_runs(dir: &TempDir) -> Vec<(u32, Vec<String>)> {
    fs::read_to_string(dir.path().join("record"))
        .unwrap_or_default()
        .lines()
        .map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next().unwrap().parse().unwrap();
            (pid, parts.map(str::to_string).collect())
        })
        .collect()
}

fn wait_until_gone(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !platform::is_process_running(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn surviving_process_is_running_and_gets_scratch_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, sleeper(&dir));

    let mut instance = manager.create_on_port(6500).unwrap();
    assert_eq!(instance.status(), InstanceStatus::Running);
    assert_eq!(instance.port(), 6500);

    let runs = recorded_runs(&dir);
    assert_eq!(runs.len(), 1);
    let (pid, args) = &runs[0];
    assert_eq!(instance.pid(), Some(*pid));
    assert_eq!(&args[..2], &["--port", "6500"]);
    assert_eq!(
        args[3],
        dir.path().join("disposable_redis.6500.pid").display().to_string()
    );
    assert!(args[7].starts_with("dump.6500."));

    instance.stop().unwrap();
}

#[test]
fn stop_is_idempotent_and_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, sleeper(&dir));

    let mut instance = manager.create_on_random_port().unwrap();
    let pid = instance.pid().unwrap();
    assert!(platform::is_process_running(pid));

    instance.stop().unwrap();
    assert_eq!(instance.status(), InstanceStatus::Stopped);
    assert!(!platform::is_process_running(pid));

    let started = Instant::now();
    instance.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(instance.status(), InstanceStatus::Stopped);
}

#[test]
fn dropping_an_instance_stops_it() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, sleeper(&dir));

    let instance = manager.create_on_random_port().unwrap();
    let pid = instance.pid().unwrap();
    drop(instance);

    assert!(!platform::is_process_running(pid));
}

#[test]
fn early_exit_is_reported_with_output() {
    let dir = tempfile::tempdir().unwrap();
    let binary = script(dir.path(), "crash.sh", "echo 'bad config'\nexit 3");
    let manager = manager(&dir, binary);

    match manager.create_on_port(6501).unwrap_err() {
        LaunchError::EarlyExit {
            port,
            status,
            output,
        } => {
            assert_eq!(port, 6501);
            assert_eq!(status.code(), Some(3));
            assert!(output.contains("bad config"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn bind_failure_is_port_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let binary = script(
        dir.path(),
        "busy.sh",
        "echo \"Could not create server TCP listening socket *:$2: bind: Address already in use\"\nexit 1",
    );
    let manager = manager(&dir, binary);

    let err = manager.create_on_port(6502).unwrap_err();
    assert!(err.is_port_in_use(), "unexpected error: {}", err);
}

#[test]
fn random_port_retries_then_returns_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let attempts = dir.path().join("attempts");
    let binary = script(
        dir.path(),
        "always_busy.sh",
        &format!(
            "echo \"$2\" >> {}\necho 'bind: Address already in use'\nexit 1",
            attempts.display()
        ),
    );
    let manager = manager(&dir, binary);

    let err = manager.create_on_random_port().unwrap_err();
    assert!(err.is_port_in_use());

    let ports: Vec<u16> = fs::read_to_string(&attempts)
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect();
    assert_eq!(ports.len(), 3);
    assert!(ports.iter().all(|p| *p >= 1025));
    match err {
        LaunchError::PortInUse { port } => assert_eq!(port, ports[2]),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn concurrent_instances_get_distinct_scratch_files() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, sleeper(&dir));

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| manager.create_on_random_port().unwrap());
        let b = s.spawn(|| manager.create_on_random_port().unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });

    assert_ne!(a.scratch_files().data_file, b.scratch_files().data_file);
    assert_ne!(a.log_file(), b.log_file());
    assert_ne!(a.pid(), b.pid());
}

#[test]
fn replica_that_never_listens_is_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, sleeper(&dir));

    let master = manager.create_on_port(6503).unwrap();
    let err = manager.attach_as_replica(&master).unwrap_err();

    match err {
        ReplicationError::NotReady(ref timeout) => assert!(timeout.is_connection_refused()),
        ref other => panic!("unexpected error: {}", other),
    }
    let replica_port = err.replica_port().unwrap();

    let runs = recorded_runs(&dir);
    assert_eq!(runs.len(), 2);
    let (replica_pid, args) = &runs[1];
    assert_eq!(args[1], replica_port.to_string());
    assert!(wait_until_gone(*replica_pid));

    // The master is untouched by the failed join
    assert!(platform::is_process_running(master.pid().unwrap()));
}
