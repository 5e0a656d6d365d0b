//! Per-pipe state and the tasks that drive one pipe.
//!
//! Every live pipe owns up to three I/O-thread tasks: listeners run an
//! accept loop; stream pipes run a read loop plus a writer task fed by an
//! in-order job queue. All of them stay on the I/O thread (`spawn_local`),
//! so pipe state needs no synchronization beyond `Cell`/`RefCell`.

use std::cell::{Cell, RefCell};
use std::io;
use std::io::IoSlice;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::codes::{self, io_error_code};
use crate::framing::{Collector, CollectorStatus, HEADER_SIZE};
use crate::piper::core::Core;
use crate::piper::request::Sink;
use crate::transport::{PipeListener, PipeReader, PipeWriter};
use crate::Descriptor;

/// One queued outbound frame: pre-packed header, payload, completion.
pub(crate) struct WriteJob {
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
    pub sink: Sink<i32>,
}

enum PipeKind {
    Listener,
    Stream { writer: mpsc::UnboundedSender<WriteJob> },
}

/// State shared between a pipe's tasks and the descriptor table.
pub(crate) struct Pipe {
    descriptor: Descriptor,
    kind: PipeKind,
    closing: Cell<bool>,
    close_code: Cell<i32>,
    close_request: RefCell<Option<Sink<i32>>>,
    stop_read: Notify,
    stop_write: Notify,
}

impl Pipe {
    pub fn new_listener(descriptor: Descriptor) -> Rc<Self> {
        Rc::new(Self {
            descriptor,
            kind: PipeKind::Listener,
            closing: Cell::new(false),
            close_code: Cell::new(0),
            close_request: RefCell::new(None),
            stop_read: Notify::new(),
            stop_write: Notify::new(),
        })
    }

    pub fn new_stream(descriptor: Descriptor, writer: mpsc::UnboundedSender<WriteJob>) -> Rc<Self> {
        Rc::new(Self {
            descriptor,
            kind: PipeKind::Stream { writer },
            closing: Cell::new(false),
            close_code: Cell::new(0),
            close_request: RefCell::new(None),
            stop_read: Notify::new(),
            stop_write: Notify::new(),
        })
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.kind, PipeKind::Listener)
    }

    /// Ask the pipe to close. The first call wins: it records the close
    /// code and wakes the pipe's tasks; later calls are swallowed, so the
    /// destruction notification fires exactly once.
    pub fn close(&self, code: i32) {
        if self.closing.replace(true) {
            return;
        }
        self.close_code.set(code);
        self.stop_read.notify_one();
        self.stop_write.notify_one();
    }

    pub fn close_code(&self) -> i32 {
        self.close_code.get()
    }

    /// Attach a close request to this pipe. At most one may be pending;
    /// the sink comes back to the caller if the slot is occupied.
    pub fn set_close_request(&self, sink: Sink<i32>) -> Result<(), Sink<i32>> {
        let mut slot = self.close_request.borrow_mut();
        if slot.is_some() {
            return Err(sink);
        }
        *slot = Some(sink);
        Ok(())
    }

    pub fn take_close_request(&self) -> Option<Sink<i32>> {
        self.close_request.borrow_mut().take()
    }

    /// Queue an outbound frame on this pipe's writer.
    ///
    /// Only valid for stream pipes; the request dispatcher rejects writes
    /// to listeners before getting here.
    pub fn submit(&self, job: WriteJob) {
        match &self.kind {
            PipeKind::Stream { writer } => {
                if let Err(mpsc::error::SendError(job)) = writer.send(job) {
                    // Writer already gone; the pipe is tearing down.
                    job.sink.complete(codes::CANCELLED);
                }
            }
            PipeKind::Listener => {
                debug_assert!(false, "submit on a listener pipe");
                job.sink.complete(codes::UNSUPPORTED);
            }
        }
    }
}

/// Accept loop for a listener pipe.
///
/// A failed accept leaves no partial state behind: nothing has been
/// registered yet, so logging and moving on is the whole cleanup.
pub(crate) async fn accept_loop(core: Rc<Core>, pipe: Rc<Pipe>, listener: PipeListener) {
    loop {
        tokio::select! {
            _ = pipe.stop_read.notified() => break,
            result = listener.accept() => match result {
                Ok(stream) => core.clone().adopt(pipe.descriptor(), stream),
                Err(err) => {
                    warn!(
                        listener = pipe.descriptor(),
                        error = %err,
                        "failed to accept an incoming connection"
                    );
                }
            }
        }
    }
    core.finish_close(&pipe);
}

/// Read loop for a stream pipe. Owns the Collector; exits on EOF, read
/// error, framing corruption or an explicit close, then retires the pipe.
pub(crate) async fn read_loop(
    core: Rc<Core>,
    pipe: Rc<Pipe>,
    mut reader: PipeReader,
    recv_hint: usize,
) {
    let mut collector = Collector::new();
    let mut buf = BytesMut::with_capacity(recv_hint);

    loop {
        buf.reserve(recv_hint);
        let done = tokio::select! {
            _ = pipe.stop_read.notified() => true,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => {
                    debug!(descriptor = pipe.descriptor(), "end of stream");
                    if collector.contains(1) {
                        warn!(
                            descriptor = pipe.descriptor(),
                            "end of stream with an incomplete message buffered"
                        );
                    }
                    pipe.close(0);
                    true
                }
                Ok(_) => {
                    collector.append(buf.split().freeze());
                    deliver(&core, &pipe, &mut collector)
                }
                Err(err) => {
                    let code = io_error_code(&err);
                    warn!(descriptor = pipe.descriptor(), code, "read error");
                    pipe.close(code);
                    true
                }
            }
        };
        if done {
            break;
        }
    }

    core.finish_close(&pipe);
}

/// Hand buffered messages to the delegate; returns true when the pipe is
/// done for.
///
/// The repeated extract-and-deliver is intentional: the delegate must
/// consume at least one message per call, and everything it leaves behind
/// is delivered again before the next read.
fn deliver(core: &Rc<Core>, pipe: &Rc<Pipe>, collector: &mut Collector) -> bool {
    while collector.status() == CollectorStatus::HasMessage {
        if !core.notify_message(pipe.descriptor(), collector) {
            // The delegate panicked; the pipe cannot be serviced further.
            pipe.close(codes::CONNECTION_ABORTED);
            return true;
        }
    }
    if collector.status() == CollectorStatus::Corrupt {
        warn!(descriptor = pipe.descriptor(), "corrupt message stream");
        pipe.close(codes::CONNECTION_ABORTED);
        return true;
    }
    false
}

/// Writer task for a stream pipe. Jobs complete in submission order; a
/// write error resolves the failing job and closes the pipe with the same
/// code. Jobs still queued when the pipe goes down complete `CANCELLED`.
pub(crate) async fn write_loop(
    pipe: Rc<Pipe>,
    mut writer: PipeWriter,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
) {
    loop {
        let job = tokio::select! {
            _ = pipe.stop_write.notified() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            }
        };

        match write_frame(&mut writer, &job.header, &job.payload).await {
            Ok(()) => job.sink.complete(0),
            Err(err) => {
                let code = io_error_code(&err);
                warn!(descriptor = pipe.descriptor(), code, "write error");
                job.sink.complete(code);
                pipe.close(code);
                break;
            }
        }
    }

    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        job.sink.complete(codes::CANCELLED);
    }
}

/// Scatter `[header, payload]` in one vectored write, continuing through
/// partial writes until the frame is fully on the wire.
async fn write_frame<W>(
    writer: &mut W,
    header: &[u8; HEADER_SIZE],
    payload: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total = HEADER_SIZE + payload.len();
    let mut written = 0;

    while written < total {
        let mut slices = [IoSlice::new(&[]); 2];
        let count = remaining_slices(header, payload, written, &mut slices);
        let n = writer.write_vectored(&slices[..count]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// Build the IoSlice pair for the unwritten tail of a frame.
fn remaining_slices<'a>(
    header: &'a [u8; HEADER_SIZE],
    payload: &'a [u8],
    skip: usize,
    out: &mut [IoSlice<'a>; 2],
) -> usize {
    let mut count = 0;
    if skip < HEADER_SIZE {
        out[count] = IoSlice::new(&header[skip..]);
        count += 1;
        if !payload.is_empty() {
            out[count] = IoSlice::new(payload);
            count += 1;
        }
    } else {
        let offset = skip - HEADER_SIZE;
        if offset < payload.len() {
            out[count] = IoSlice::new(&payload[offset..]);
            count += 1;
        }
    }
    count
}
