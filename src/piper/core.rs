//! The I/O-thread side of the Piper: event loop, request dispatch, and
//! the descriptor table.
//!
//! Everything in this module runs on the dedicated I/O thread, inside a
//! current-thread runtime with a `LocalSet`, so the descriptor table and
//! the descriptor counter live behind plain `RefCell`/`Cell`. The only
//! cross-thread state is [`Shared`]: the request queue, the stop flag and
//! the wake-up.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{debug, error};

use crate::codes::{self, io_error_code};
use crate::framing::Collector;
use crate::piper::pipe::{accept_loop, read_loop, write_loop, Pipe, WriteJob};
use crate::piper::request::{Request, Sink};
use crate::piper::PiperDelegate;
use crate::transport::{PipeListener, PipeStream};
use crate::{Descriptor, Result};

/// Cross-thread intake: the request queue, the stop flag, the wake-up.
pub(crate) struct Shared {
    queue: Mutex<QueueState>,
    wakeup: Notify,
    io_thread: OnceLock<ThreadId>,
}

struct QueueState {
    requests: Vec<Request>,
    stopped: bool,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(QueueState {
                requests: Vec::new(),
                stopped: false,
            }),
            wakeup: Notify::new(),
            io_thread: OnceLock::new(),
        }
    }

    /// Enqueue a request and poke the I/O thread. Requests posted after
    /// the stop flag is raised complete `CANCELLED` right here; the loop
    /// will never drain them.
    pub fn post(&self, request: Request) {
        let rejected = {
            let mut queue = self.queue.lock().unwrap();
            if queue.stopped {
                Some(request)
            } else {
                queue.requests.push(request);
                None
            }
        };
        match rejected {
            Some(request) => request.abort(),
            None => self.wakeup.notify_one(),
        }
    }

    /// Raise the stop flag and wake the loop.
    pub fn request_stop(&self) {
        self.queue.lock().unwrap().stopped = true;
        self.wakeup.notify_one();
    }

    /// True when called on the I/O thread this Shared belongs to.
    pub fn on_io_thread(&self) -> bool {
        self.io_thread.get() == Some(&thread::current().id())
    }

    /// Swap the intake vector with `drain` (which must be empty) and read
    /// the stop flag, all under one lock.
    fn swap_queue(&self, drain: &mut Vec<Request>) -> bool {
        let mut queue = self.queue.lock().unwrap();
        std::mem::swap(&mut queue.requests, drain);
        queue.stopped
    }
}

/// I/O-thread state: descriptor table, counter, delegate access.
pub(crate) struct Core {
    delegate: Arc<dyn PiperDelegate>,
    shared: Arc<Shared>,
    pipes: RefCell<HashMap<Descriptor, Rc<Pipe>>>,
    next_descriptor: Cell<Descriptor>,
    pipe_retired: Notify,
    stopping: Cell<bool>,
}

/// Body of the I/O thread: build the runtime, report construction to the
/// constructor thread, then run the loop to completion.
pub(crate) fn run(
    delegate: Arc<dyn PiperDelegate>,
    shared: Arc<Shared>,
    init_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    shared
        .io_thread
        .set(thread::current().id())
        .expect("io thread id set twice");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = init_tx.send(Err(err.into()));
            return;
        }
    };

    let core = Rc::new(Core {
        delegate,
        shared: shared.clone(),
        pipes: RefCell::new(HashMap::new()),
        next_descriptor: Cell::new(1),
        pipe_retired: Notify::new(),
        stopping: Cell::new(false),
    });

    let _ = init_tx.send(Ok(()));

    let local = LocalSet::new();
    local.block_on(&runtime, core.main_loop());
}

impl Core {
    /// Wake, drain, dispatch, until a stop is requested; then abort the
    /// drained batch and sweep the remaining pipes.
    async fn main_loop(self: Rc<Self>) {
        debug!("piper loop running");

        let mut drain: Vec<Request> = Vec::new();
        loop {
            self.shared.wakeup.notified().await;

            let stopping = self.shared.swap_queue(&mut drain);
            if stopping {
                for request in drain.drain(..) {
                    request.abort();
                }
                break;
            }
            for request in drain.drain(..) {
                self.clone().dispatch(request);
            }
        }

        self.shutdown_pipes().await;
        debug!("piper loop done");
    }

    fn dispatch(self: Rc<Self>, request: Request) {
        match request {
            Request::Listen { address, sink } => self.handle_listen(&address, sink),
            Request::Connect { address, sink } => {
                tokio::task::spawn_local(self.clone().handle_connect(address, sink));
            }
            Request::Write {
                descriptor,
                header,
                payload,
                sink,
            } => self.handle_write(descriptor, WriteJob { header, payload, sink }),
            Request::Close { descriptor, sink } => self.handle_close(descriptor, sink),
        }
    }

    fn handle_listen(self: Rc<Self>, address: &str, sink: Sink<(Descriptor, i32)>) {
        let listener = match PipeListener::bind(address) {
            Ok(listener) => listener,
            Err(err) => {
                sink.complete((0, io_error_code(&err)));
                return;
            }
        };

        let descriptor = self.next_descriptor();
        let pipe = Pipe::new_listener(descriptor);
        self.pipes.borrow_mut().insert(descriptor, pipe.clone());
        tokio::task::spawn_local(accept_loop(self, pipe, listener));

        debug!(descriptor, address, "listening");
        sink.complete((descriptor, 0));
    }

    async fn handle_connect(self: Rc<Self>, address: String, sink: Sink<(Descriptor, i32)>) {
        match PipeStream::connect(&address).await {
            Ok(stream) => {
                if self.stopping.get() {
                    sink.complete((0, codes::CANCELLED));
                    return;
                }
                let descriptor = self.register_stream(stream);
                debug!(descriptor, address = address.as_str(), "connected");
                sink.complete((descriptor, 0));
            }
            Err(err) => sink.complete((0, io_error_code(&err))),
        }
    }

    fn handle_write(&self, descriptor: Descriptor, job: WriteJob) {
        let pipes = self.pipes.borrow();
        match pipes.get(&descriptor) {
            None => job.sink.complete(codes::NOT_CONNECTED),
            Some(pipe) if pipe.is_listener() => job.sink.complete(codes::UNSUPPORTED),
            Some(pipe) => pipe.submit(job),
        }
    }

    fn handle_close(&self, descriptor: Descriptor, sink: Sink<i32>) {
        let pipe = match self.pipes.borrow().get(&descriptor) {
            Some(pipe) => pipe.clone(),
            None => {
                sink.complete(codes::NOT_CONNECTED);
                return;
            }
        };
        match pipe.set_close_request(sink) {
            Ok(()) => pipe.close(0),
            Err(sink) => sink.complete(codes::UNSUPPORTED),
        }
    }

    /// Register an accepted or connected stream: allocate a descriptor,
    /// start the writer and read tasks, publish the pipe.
    ///
    /// The tasks cannot run before the table insert (nothing yields in
    /// between on this single-threaded loop), so no half-registered pipe
    /// is ever observable.
    fn register_stream(self: Rc<Self>, stream: PipeStream) -> Descriptor {
        let descriptor = self.next_descriptor();
        let recv_hint = stream.recv_buffer_hint();
        let (reader, writer) = stream.into_split();

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let pipe = Pipe::new_stream(descriptor, jobs_tx);

        tokio::task::spawn_local(write_loop(pipe.clone(), writer, jobs_rx));
        tokio::task::spawn_local(read_loop(self.clone(), pipe.clone(), reader, recv_hint));

        self.pipes.borrow_mut().insert(descriptor, pipe);
        descriptor
    }

    /// Acceptance path: register the new stream and tell the delegate.
    pub(crate) fn adopt(self: Rc<Self>, listener: Descriptor, stream: PipeStream) {
        if self.stopping.get() {
            return;
        }
        let descriptor = self.clone().register_stream(stream);
        debug!(listener, pipe = descriptor, "accepted connection");
        let delegate = &self.delegate;
        if panic::catch_unwind(AssertUnwindSafe(|| {
            delegate.on_new_connection(listener, descriptor)
        }))
        .is_err()
        {
            error!(descriptor, "delegate panicked in on_new_connection");
        }
    }

    /// Deliver one message notification; false when the delegate panicked.
    pub(crate) fn notify_message(&self, descriptor: Descriptor, collector: &mut Collector) -> bool {
        let delegate = &self.delegate;
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            delegate.on_message(descriptor, collector)
        }));
        if delivered.is_err() {
            error!(descriptor, "delegate panicked in on_message");
        }
        delivered.is_ok()
    }

    /// Retire a pipe: drop it from the table, notify the delegate, then
    /// resolve any pending close request: the caller observing success
    /// knows the resource is gone. Runs exactly once per pipe, from the
    /// single exit of its read or accept task.
    pub(crate) fn finish_close(&self, pipe: &Rc<Pipe>) {
        let removed = self.pipes.borrow_mut().remove(&pipe.descriptor());
        debug_assert!(removed.is_some(), "pipe retired twice");

        let code = pipe.close_code();
        debug!(descriptor = pipe.descriptor(), code, "pipe closed");

        let delegate = &self.delegate;
        if panic::catch_unwind(AssertUnwindSafe(|| {
            delegate.on_pipe_closed(pipe.descriptor(), code)
        }))
        .is_err()
        {
            error!(
                descriptor = pipe.descriptor(),
                "delegate panicked in on_pipe_closed"
            );
        }

        if let Some(sink) = pipe.take_close_request() {
            sink.complete(0);
        }

        self.pipe_retired.notify_waiters();
    }

    /// Close every remaining pipe and wait until the table is empty.
    /// Data pipes that had not already been closed gracefully go down
    /// with `CONNECTION_ABORTED`; listeners carry no stream to abort and
    /// retire cleanly.
    async fn shutdown_pipes(&self) {
        self.stopping.set(true);

        let pipes: Vec<Rc<Pipe>> = self.pipes.borrow().values().cloned().collect();
        for pipe in pipes {
            let code = if pipe.is_listener() {
                0
            } else {
                codes::CONNECTION_ABORTED
            };
            pipe.close(code);
        }

        loop {
            let retired = self.pipe_retired.notified();
            tokio::pin!(retired);
            retired.as_mut().enable();
            if self.pipes.borrow().is_empty() {
                break;
            }
            retired.await;
        }
    }

    fn next_descriptor(&self) -> Descriptor {
        let descriptor = self.next_descriptor.get();
        self.next_descriptor.set(descriptor + 1);
        descriptor
    }
}
