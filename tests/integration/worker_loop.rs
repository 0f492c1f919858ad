//! Worker accept loop and capacity signalling, run in-process.

use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use prefork::control::{self, Capacity, ControlEndpoint, Message};
use prefork::readiness::wait_readable;
use prefork::worker::{self, WorkerExit, WorkerReport};
use prefork::{JobFactory, PoolConfig};

use crate::helpers::*;

struct TestWorker {
    addr: SocketAddr,
    control: ControlEndpoint,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<WorkerReport>,
}

impl TestWorker {
    fn start<F: JobFactory<()>>(config: PoolConfig, factory: F) -> Self {
        let listener = loopback_listener();
        let addr = listener.local_addr().unwrap();
        let (control, worker_end) = control::channel().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            worker::run(
                &listener,
                worker_end,
                &config,
                Arc::new(factory),
                Arc::new(()),
                &flag,
            )
            .unwrap()
        });

        Self {
            addr,
            control,
            stop,
            thread,
        }
    }
}

/// Next control message, or `None` if nothing arrives within `timeout`.
fn next_message(control: &mut ControlEndpoint, timeout: Duration) -> Option<Message> {
    let ready = wait_readable(&[control.as_fd()], Some(timeout)).unwrap();
    ready[0].then(|| control.recv().unwrap())
}

fn expect_message(control: &mut ControlEndpoint) -> Message {
    next_message(control, WAIT_TIMEOUT).expect("control message")
}

/// Every message up to and including channel close.
fn drain_messages(control: &mut ControlEndpoint) -> Vec<Message> {
    let mut messages = Vec::new();
    loop {
        let message = expect_message(control);
        messages.push(message);
        if message == Message::Closed {
            return messages;
        }
    }
}

const FULL: Message = Message::Capacity(Capacity::Full);
const AVAILABLE: Message = Message::Capacity(Capacity::Available);

/// Reaching the thread limit sends exactly one 0x00, and freeing a thread
/// sends exactly one 0xFF
#[test]
fn test_capacity_transitions_are_signalled_once() {
    let _guard = serial();
    let mut worker = TestWorker::start(PoolConfig::new(1, 1, 1, 1), LineJobs);

    let mut first = Client::connect(worker.addr);
    first.send("hold");
    assert_eq!(expect_message(&mut worker.control), FULL);

    // Not accepted while full, and nothing else is signalled
    let mut second = Client::connect(worker.addr);
    second.send("queued");
    assert_eq!(next_message(&mut worker.control, Duration::from_millis(300)), None);
    assert_eq!(second.recv_within(Duration::from_millis(100)), None);

    first.send("release");
    assert!(first.recv().ends_with(" hold"));
    drop(first);
    assert_eq!(expect_message(&mut worker.control), AVAILABLE);

    assert!(second.recv().ends_with(" queued"));
    drop(second);
    assert_eq!(expect_message(&mut worker.control), FULL);
    assert_eq!(expect_message(&mut worker.control), AVAILABLE);
    assert_eq!(next_message(&mut worker.control, Duration::from_millis(100)), None);

    drop(worker.control);
    let report = worker.thread.join().unwrap();
    assert_eq!(report.exit, WorkerExit::ControlClosed);
    assert_eq!(report.accepted, 2);
}

/// Headroom below the thread limit sends nothing
#[test]
fn test_no_signal_below_thread_limit() {
    let _guard = serial();
    let mut worker = TestWorker::start(PoolConfig::new(1, 1, 1, 3), LineJobs);

    let mut first = Client::connect(worker.addr);
    first.send("hold");
    let mut second = Client::connect(worker.addr);
    second.send("hold");
    assert_eq!(next_message(&mut worker.control, Duration::from_millis(300)), None);

    for client in [&mut first, &mut second] {
        client.send("release");
        client.recv();
    }
    drop(first);
    drop(second);
    assert_eq!(next_message(&mut worker.control, Duration::from_millis(200)), None);

    drop(worker.control);
    let report = worker.thread.join().unwrap();
    assert_eq!(report.accepted, 2);
}

/// After `max_requests_per_worker` connections the worker reports full,
/// drains and exits
#[test]
fn test_worker_retires_after_max_requests() {
    let _guard = serial();
    let config = PoolConfig::new(1, 1, 1, 2).with_max_requests_per_worker(5);
    let mut worker = TestWorker::start(config, LineJobs);

    let pid = ping_once(worker.addr, "one");
    for _ in 0..4 {
        assert_eq!(ping_once(worker.addr, "more"), pid);
    }

    let report = worker.thread.join().unwrap();
    assert_eq!(report.exit, WorkerExit::Retired);
    assert_eq!(report.accepted, 5);

    let messages = drain_messages(&mut worker.control);
    assert_eq!(messages.last(), Some(&Message::Closed));
    let capacity: Vec<&Message> = messages.iter().filter(|m| **m != Message::Closed).collect();
    assert_eq!(capacity.last(), Some(&&FULL), "retiring worker must report full");
}

/// The stop flag drains in-flight jobs and never re-advertises capacity
#[test]
fn test_stop_flag_drains_without_advertising() {
    let _guard = serial();
    let mut worker = TestWorker::start(PoolConfig::new(1, 1, 1, 1), LineJobs);

    let mut client = Client::connect(worker.addr);
    client.send("hold");
    assert_eq!(expect_message(&mut worker.control), FULL);

    worker.stop.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(400));
    assert!(!worker.thread.is_finished(), "worker must wait for its job");

    client.send("release");
    assert!(client.recv().ends_with(" hold"));
    drop(client);

    let report = worker.thread.join().unwrap();
    assert_eq!(report.exit, WorkerExit::Stopped);
    assert_eq!(report.accepted, 1);
    assert_eq!(drain_messages(&mut worker.control), vec![Message::Closed]);
}

/// A panicking job frees its thread slot
#[test]
fn test_panicking_job_releases_slot() {
    let _guard = serial();
    let factory = |conn: TcpStream, _peer: SocketAddr, _args: &()| {
        move || {
            drop(conn);
            panic!("job failed");
        }
    };
    let mut worker = TestWorker::start(PoolConfig::new(1, 1, 1, 1), factory);

    for _ in 0..2 {
        let _client = TcpStream::connect(worker.addr).unwrap();
        assert_eq!(expect_message(&mut worker.control), FULL);
        assert_eq!(expect_message(&mut worker.control), AVAILABLE);
    }

    drop(worker.control);
    let report = worker.thread.join().unwrap();
    assert_eq!(report.exit, WorkerExit::ControlClosed);
    assert_eq!(report.accepted, 2);
}
