//! Test helpers and utilities

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use prefork::{Job, JobFactory, PoolConfig, PoolStatus, Server, ShutdownHandle, StatusSnapshot};

/// Default upper bound for anything the tests wait on.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

static SERIAL: Mutex<()> = Mutex::new(());

/// Serialize tests in this binary.
///
/// Forked workers inherit every descriptor open in the test process, so a
/// test running alongside another one would keep the other's control
/// channels and sockets alive.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listening socket on an ephemeral loopback port.
pub fn loopback_listener() -> TcpListener {
    prefork::listener::bind("127.0.0.1:0".parse().unwrap(), 128).expect("bind loopback")
}

/// Factory for [`LineJob`].
pub struct LineJobs;

impl JobFactory<()> for LineJobs {
    type Job = LineJob;

    fn create(&self, conn: TcpStream, _peer: SocketAddr, _args: &()) -> LineJob {
        LineJob { conn }
    }
}

/// Line-oriented test job.
///
/// Every line is answered with `"<pid> <line>"`. Two lines change behavior:
/// `hold` waits for one more line before answering, and `hang` never
/// returns.
pub struct LineJob {
    conn: TcpStream,
}

impl Job for LineJob {
    fn run(self) {
        let Ok(mut writer) = self.conn.try_clone() else {
            return;
        };
        let pid = std::process::id();
        let mut lines = BufReader::new(self.conn).lines();

        while let Some(Ok(line)) = lines.next() {
            match line.as_str() {
                "hold" => {
                    if !matches!(lines.next(), Some(Ok(_))) {
                        return;
                    }
                }
                "hang" => loop {
                    thread::sleep(Duration::from_secs(1));
                },
                _ => {}
            }
            if writeln!(writer, "{} {}", pid, line).is_err() {
                return;
            }
        }
    }
}

/// Blocking line client with a read timeout.
pub struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        Self {
            writer: stream,
            reader,
        }
    }

    pub fn send(&mut self, line: &str) {
        writeln!(self.writer, "{}", line).expect("send line");
    }

    /// Next reply line, or `None` if nothing arrives within `timeout`.
    pub fn recv_within(&mut self, timeout: Duration) -> Option<String> {
        self.writer
            .set_read_timeout(Some(timeout))
            .expect("set read timeout");
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_string()),
        }
    }

    pub fn recv(&mut self) -> String {
        self.recv_within(WAIT_TIMEOUT).expect("reply within timeout")
    }

    /// Send one line and return the pid of the worker that answered it.
    pub fn ping(&mut self, line: &str) -> i32 {
        self.send(line);
        let reply = self.recv();
        let (pid, echoed) = reply.split_once(' ').expect("reply has pid prefix");
        assert_eq!(echoed, line);
        pid.parse().expect("numeric pid")
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Workers forked later hold copies of this socket; shutdown reaches
        // the server side regardless
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

/// Send a line on a fresh connection and return the answering worker's pid.
pub fn ping_once(addr: SocketAddr, line: &str) -> i32 {
    Client::connect(addr).ping(line)
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

type TestPool = Server<LineJobs, ()>;

/// A [`Server`] running on a background thread.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub handle: ShutdownHandle,
    status: Arc<PoolStatus>,
    thread: JoinHandle<(TestPool, Arc<TcpListener>, bool)>,
}

impl RunningServer {
    pub fn start(config: PoolConfig) -> Self {
        let server = Server::new(config, LineJobs, ()).expect("create server");
        Self::resume(server, Arc::new(loopback_listener()))
    }

    /// Run an existing server again on the same listener.
    pub fn resume(mut server: TestPool, listener: Arc<TcpListener>) -> Self {
        let addr = listener.local_addr().expect("local addr");
        let handle = server.shutdown_handle();
        let status = server.status();

        let thread = thread::spawn(move || {
            let reload = server.run(&listener).expect("server run");
            (server, listener, reload)
        });

        Self {
            addr,
            handle,
            status,
            thread,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Wait until the published status satisfies `condition`.
    pub fn wait_for(&self, condition: impl Fn(&StatusSnapshot) -> bool) -> bool {
        wait_until(WAIT_TIMEOUT, || condition(&self.status.snapshot()))
    }

    /// Wait until exactly `workers` workers are registered, all available.
    pub fn wait_settled(&self, workers: usize) -> bool {
        self.wait_for(|s| s.workers == workers && s.available == workers)
    }

    /// Wait for `run` to return.
    pub fn join(self) -> (TestPool, Arc<TcpListener>, bool) {
        self.thread.join().expect("server thread panicked")
    }

    /// Request a graceful stop and wait for it. Returns `run`'s result.
    pub fn stop(self) -> bool {
        self.handle.terminate();
        self.join().2
    }
}
