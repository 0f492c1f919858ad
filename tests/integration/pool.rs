//! Pool sizing: spare balancing, saturation, replacement.

use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use prefork::PoolConfig;

use crate::helpers::*;

fn short_grace(config: PoolConfig) -> PoolConfig {
    config
        .with_grace_period(Duration::from_secs(2))
        .with_reap_interval(Duration::from_millis(50))
}

/// With no load the pool settles at `max_spare` available workers
#[test]
fn test_idle_pool_settles_at_max_spare() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(2, 4, 8, 3)));

    assert!(server.wait_settled(4), "pool did not settle: {:?}", server.snapshot());

    thread::sleep(Duration::from_millis(300));
    let snapshot = server.snapshot();
    assert_eq!(snapshot.workers, 4);
    assert_eq!(snapshot.available, 4);
    assert_eq!(snapshot.spawned, 4);
    assert_eq!(snapshot.retired, 0);

    assert!(!server.stop());
}

/// Connections are served by the workers
#[test]
fn test_connections_are_served() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(1, 2, 4, 2)));
    assert!(server.wait_settled(2));

    let mut client = Client::connect(server.addr);
    let first = client.ping("hello");
    let second = client.ping("again");
    assert_eq!(first, second, "one connection is served by one worker");
    assert_ne!(first, std::process::id() as i32);
    drop(client);

    assert!(!server.stop());
}

/// A worker at its thread limit stops accepting until a thread frees up
#[test]
fn test_saturated_worker_defers_new_connections() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(1, 1, 1, 1)));
    assert!(server.wait_settled(1));

    let mut first = Client::connect(server.addr);
    first.send("hold");
    assert!(
        server.wait_for(|s| s.available == 0),
        "worker never reported full"
    );

    let mut second = Client::connect(server.addr);
    second.send("queued");
    assert_eq!(second.recv_within(Duration::from_millis(300)), None);

    // max_children is 1, so no second worker appears
    let snapshot = server.snapshot();
    assert_eq!(snapshot.workers, 1);
    assert_eq!(snapshot.spawned, 1);

    first.send("release");
    let held = first.recv();
    assert!(held.ends_with(" hold"), "unexpected reply {:?}", held);

    let queued = second.recv();
    assert!(queued.ends_with(" queued"), "unexpected reply {:?}", queued);
    drop(first);
    drop(second);

    assert!(server.wait_settled(1), "worker never reported available again");
    assert!(!server.stop());
}

/// Busy workers never push the process count past `max_children`
#[test]
fn test_max_children_is_never_exceeded() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(2, 3, 3, 1)));
    assert!(server.wait_settled(3));

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = Client::connect(server.addr);
        client.send("hold");
        clients.push(client);
    }
    assert!(server.wait_for(|s| s.available == 0), "{:?}", server.snapshot());

    thread::sleep(Duration::from_millis(300));
    let snapshot = server.snapshot();
    assert_eq!(snapshot.workers, 3);
    assert_eq!(snapshot.spawned, 3);

    let mut pids = Vec::new();
    for client in &mut clients {
        client.send("release");
        let reply = client.recv();
        pids.push(reply.split_once(' ').map(|(pid, _)| pid.to_string()));
    }
    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), 3, "each held connection had its own worker");
    drop(clients);

    assert!(server.wait_settled(3));
    assert!(!server.stop());
}

/// Once load drops, surplus idle workers are retired oldest first
#[test]
fn test_surplus_workers_are_retired_oldest_first() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(1, 1, 3, 1)));
    assert!(server.wait_settled(1));

    // Each held connection fills one worker, so a new one is spawned
    let mut first = Client::connect(server.addr);
    first.send("hold");
    assert!(
        server.wait_for(|s| s.workers == 2 && s.available == 1),
        "{:?}",
        server.snapshot()
    );
    let mut second = Client::connect(server.addr);
    second.send("hold");
    assert!(
        server.wait_for(|s| s.workers == 3 && s.available == 1),
        "{:?}",
        server.snapshot()
    );

    let mut busy = Vec::new();
    for client in [&mut first, &mut second] {
        client.send("release");
        let reply = client.recv();
        let (pid, _) = reply.split_once(' ').expect("reply has pid prefix");
        busy.push(pid.parse::<i32>().expect("numeric pid"));
    }
    drop(first);
    drop(second);
    assert_ne!(busy[0], busy[1]);

    assert!(
        server.wait_for(|s| s.workers == 1 && s.available == 1 && s.reaped == 2),
        "surplus not retired: {:?}",
        server.snapshot()
    );
    let snapshot = server.snapshot();
    assert_eq!(snapshot.spawned, 3);
    assert_eq!(snapshot.retired, 2);

    // The two workers spawned first are gone; the newest one serves
    for pid in &busy {
        assert!(kill(Pid::from_raw(*pid), None).is_err(), "worker {} still alive", pid);
    }
    let survivor = ping_once(server.addr, "who");
    assert!(!busy.contains(&survivor));

    assert!(!server.stop());
}

/// A worker that dies is reaped and replaced
#[test]
fn test_killed_worker_is_replaced() {
    let _guard = serial();
    let server = RunningServer::start(short_grace(PoolConfig::new(2, 2, 4, 1)));
    assert!(server.wait_settled(2));

    let victim = ping_once(server.addr, "who");
    kill(Pid::from_raw(victim), Signal::SIGKILL).unwrap();

    assert!(
        server.wait_for(|s| s.reaped >= 1 && s.spawned >= 3 && s.workers == 2 && s.available == 2),
        "worker not replaced: {:?}",
        server.snapshot()
    );
    assert!(!server.stop());
}

/// A worker exits after `max_requests_per_worker` connections and a fresh
/// one takes over
#[test]
fn test_recycled_worker_is_replaced() {
    let _guard = serial();
    let config = short_grace(PoolConfig::new(1, 1, 1, 1)).with_max_requests_per_worker(5);
    let server = RunningServer::start(config);
    assert!(server.wait_settled(1));

    let first = ping_once(server.addr, "one");
    for _ in 0..4 {
        assert_eq!(ping_once(server.addr, "again"), first);
    }

    assert!(
        server.wait_for(|s| s.reaped >= 1 && s.spawned >= 2 && s.available == 1),
        "retired worker not replaced: {:?}",
        server.snapshot()
    );

    let next = ping_once(server.addr, "six");
    assert_ne!(next, first);

    assert!(!server.stop());
}
