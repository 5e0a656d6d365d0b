//! Shared delegates for the end-to-end tests: an echo server that writes
//! every message back, and a client that sends message chains and checks
//! the echoes against its expectations.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use pipelink::{Collector, CollectorStatus, Descriptor, PiperDelegate, PiperHandle, Result};

/// Event counters shared with completion callbacks.
#[derive(Default)]
pub struct Counters {
    pub startup: AtomicBool,
    pub shutdown: AtomicBool,
    pub new_connections: AtomicUsize,
    pub closes: AtomicUsize,
    pub error_closes: AtomicUsize,
    pub received: AtomicUsize,
    pub sent: AtomicUsize,
    pub write_errors: AtomicUsize,
    pub bad_messages: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

// ====================================================================
// Server delegate
// ====================================================================

/// Echoes every received message back on the same pipe.
#[derive(Default)]
pub struct EchoServerDelegate {
    handle: Mutex<Option<PiperHandle>>,
    pub counters: Arc<Counters>,
}

impl EchoServerDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handle(&self) -> PiperHandle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .expect("startup has run")
    }

    pub fn assess(&self, total_connections: usize, messages_per_connection: usize) {
        let c = &self.counters;
        assert!(c.startup.load(Ordering::SeqCst));
        assert!(c.shutdown.load(Ordering::SeqCst));
        assert_eq!(c.new_connections.load(Ordering::SeqCst), total_connections);
        // Every data pipe plus the listener closes exactly once.
        assert_eq!(c.closes.load(Ordering::SeqCst), total_connections + 1);
        assert_eq!(c.error_closes.load(Ordering::SeqCst), 0);
        assert_eq!(
            c.received.load(Ordering::SeqCst),
            total_connections * messages_per_connection
        );
        assert_eq!(
            c.sent.load(Ordering::SeqCst),
            total_connections * messages_per_connection
        );
        assert_eq!(c.write_errors.load(Ordering::SeqCst), 0);
    }
}

impl PiperDelegate for EchoServerDelegate {
    fn startup(&self, piper: &PiperHandle) -> Result<()> {
        *self.handle.lock().unwrap() = Some(piper.clone());
        self.counters.startup.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.counters.shutdown.store(true, Ordering::SeqCst);
    }

    fn on_new_connection(&self, _listener: Descriptor, _pipe: Descriptor) {
        bump(&self.counters.new_connections);
    }

    fn on_pipe_closed(&self, _pipe: Descriptor, code: i32) {
        bump(&self.counters.closes);
        if code != 0 {
            bump(&self.counters.error_closes);
        }
    }

    fn on_message(&self, pipe: Descriptor, collector: &mut Collector) {
        // I/O thread: the message must be extracted before returning.
        let (status, message) = collector.take_message();
        if status == CollectorStatus::HasMessage {
            bump(&self.counters.received);
            let counters = self.counters.clone();
            self.handle().write_with(pipe, message, move |code| {
                if code == 0 {
                    bump(&counters.sent);
                } else {
                    bump(&counters.write_errors);
                }
            });
        }
    }
}

// ====================================================================
// Client delegate
// ====================================================================

struct Expectation {
    messages: VecDeque<Vec<u8>>,
    remaining: usize,
}

/// Drives message chains over several connections and verifies that each
/// echo matches what was sent, in order.
pub struct EchoClientDelegate {
    handle: Mutex<Option<PiperHandle>>,
    pub counters: Arc<Counters>,
    pub successful_connections: AtomicUsize,
    expectations: Mutex<HashMap<Descriptor, Expectation>>,
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl EchoClientDelegate {
    /// The receiver fires once every successful connection has closed.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (done_tx, done_rx) = mpsc::channel();
        let delegate = Arc::new(Self {
            handle: Mutex::new(None),
            counters: Arc::default(),
            successful_connections: AtomicUsize::new(0),
            expectations: Mutex::new(HashMap::new()),
            done_tx: Mutex::new(Some(done_tx)),
        });
        (delegate, done_rx)
    }

    fn handle(&self) -> PiperHandle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .expect("startup has run")
    }

    /// Open `connections` pipes to `address` and run a chain of
    /// `messages` echo round-trips on each. Returns once every connect
    /// attempt has resolved.
    pub fn spin_up(self: &Arc<Self>, address: &str, connections: usize, messages: usize) {
        let (sync_tx, sync_rx) = mpsc::channel();
        for _ in 0..connections {
            let this = self.clone();
            let sync_tx = sync_tx.clone();
            self.handle().connect_with(address, move |descriptor, code| {
                if code == 0 {
                    this.successful_connections.fetch_add(1, Ordering::SeqCst);
                    this.expectations.lock().unwrap().insert(
                        descriptor,
                        Expectation {
                            messages: VecDeque::new(),
                            remaining: messages,
                        },
                    );
                    this.send_chain(descriptor, messages);
                }
                let _ = sync_tx.send(());
            });
        }
        drop(sync_tx);
        for _ in 0..connections {
            sync_rx.recv().expect("connect callback ran");
        }
        if self.successful_connections.load(Ordering::SeqCst) == 0 {
            // No pipe will ever close; release the waiter.
            self.signal_done();
        }
    }

    /// Send one message and queue the next from its completion, so writes
    /// on this pipe stay strictly ordered.
    fn send_chain(self: &Arc<Self>, descriptor: Descriptor, remaining: usize) {
        if remaining == 0 {
            return;
        }
        let message = format!("message-{descriptor}-{remaining}").into_bytes();
        {
            let mut expectations = self.expectations.lock().unwrap();
            let expectation = expectations.get_mut(&descriptor).expect("known pipe");
            expectation.messages.push_back(message.clone());
        }
        let this = self.clone();
        self.handle().write_with(descriptor, message, move |code| {
            if code == 0 {
                bump(&this.counters.sent);
                this.send_chain(descriptor, remaining - 1);
            } else {
                bump(&this.counters.write_errors);
                this.handle().close_with(descriptor, |_| {});
            }
        });
    }

    /// Pop the expected echo; true when it matches and the chain is not
    /// yet done.
    fn check_echo(&self, descriptor: Descriptor, message: &[u8]) -> bool {
        let (expected, done) = {
            let mut expectations = self.expectations.lock().unwrap();
            let expectation = expectations.get_mut(&descriptor).expect("known pipe");
            let expected = expectation.messages.pop_front().expect("pending echo");
            expectation.remaining -= 1;
            (expected, expectation.remaining == 0)
        };
        if done {
            self.handle().close_with(descriptor, |_| {});
        }
        expected == message
    }

    fn signal_done(&self) {
        if let Some(done_tx) = self.done_tx.lock().unwrap().take() {
            let _ = done_tx.send(());
        }
    }

    pub fn assess(&self, connections: usize, messages: usize) {
        let c = &self.counters;
        assert!(c.startup.load(Ordering::SeqCst));
        assert!(c.shutdown.load(Ordering::SeqCst));
        assert_eq!(
            self.successful_connections.load(Ordering::SeqCst),
            connections
        );
        assert_eq!(c.new_connections.load(Ordering::SeqCst), 0);
        assert_eq!(c.closes.load(Ordering::SeqCst), connections);
        assert_eq!(c.error_closes.load(Ordering::SeqCst), 0);
        assert_eq!(c.received.load(Ordering::SeqCst), connections * messages);
        assert_eq!(c.sent.load(Ordering::SeqCst), connections * messages);
        assert_eq!(c.bad_messages.load(Ordering::SeqCst), 0);
        assert_eq!(c.write_errors.load(Ordering::SeqCst), 0);
    }
}

impl PiperDelegate for EchoClientDelegate {
    fn startup(&self, piper: &PiperHandle) -> Result<()> {
        *self.handle.lock().unwrap() = Some(piper.clone());
        self.counters.startup.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.counters.shutdown.store(true, Ordering::SeqCst);
    }

    fn on_new_connection(&self, _listener: Descriptor, _pipe: Descriptor) {
        bump(&self.counters.new_connections);
    }

    fn on_pipe_closed(&self, _pipe: Descriptor, code: i32) {
        bump(&self.counters.closes);
        if code != 0 {
            bump(&self.counters.error_closes);
        }
        if self.counters.closes.load(Ordering::SeqCst)
            == self.successful_connections.load(Ordering::SeqCst)
        {
            self.signal_done();
        }
    }

    fn on_message(&self, pipe: Descriptor, collector: &mut Collector) {
        let (status, message) = collector.take_message();
        if status == CollectorStatus::HasMessage {
            bump(&self.counters.received);
            if !self.check_echo(pipe, &message) {
                bump(&self.counters.bad_messages);
                self.handle().close_with(pipe, |_| {});
            }
        }
    }
}

/// Spin until `cond` holds; panics after `timeout`.
pub fn wait_until(timeout: std::time::Duration, mut cond: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + timeout;
    while !cond() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

/// Socket path helper: a short path under the system temp directory.
/// `sockaddr_un` caps address length, so tempdirs nested deep in a target
/// directory are not usable.
pub fn socket_address(tag: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::Builder::new()
        .prefix(tag)
        .tempdir_in("/tmp")
        .expect("create socket dir");
    let address = dir
        .path()
        .join("echo.socket")
        .to_string_lossy()
        .into_owned();
    (dir, address)
}
