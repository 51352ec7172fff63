//! Backend DAP client: the socket bridge toward the backend debugger.
//!
//! Owns the writing half of the TCP connection; a reader thread decodes
//! incoming frames and feeds them into the session event channel, so the
//! session never blocks on the socket. Forwarded editor requests keep their
//! original `seq`, correlation stays intact end to end.

use crate::error::{Error, Result};
use crate::session::{BackendEvent, SessionEvent};
use crate::tracer::FileTracer;
use crate::transport::{FramedReader, FramedWriter, MessageReader, MessageWriter};
use log::debug;
use serde_json::Value;
use std::net::TcpStream;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

/// Fixed delay between the backend's "listening" signal and the connect
/// attempt, absorbing the stdout-vs-socket-bind race.
pub const CONNECT_DELAY: Duration = Duration::from_millis(200);

pub struct BackendClient {
    writer: FramedWriter<TcpStream>,
    tracer: Option<FileTracer>,
    trace_wire: bool,
}

impl BackendClient {
    /// Connect to the backend DAP server at `addr` after the fixed
    /// post-readiness delay and start the reader thread. Used on the
    /// `launch` path, where the supervisor just reported readiness.
    pub fn connect_after_ready(
        addr: &str,
        events: Sender<SessionEvent>,
        tracer: Option<FileTracer>,
        trace_wire: bool,
    ) -> Result<Self> {
        thread::sleep(CONNECT_DELAY);
        Self::connect(addr, events, tracer, trace_wire)
    }

    /// Connect immediately, for `attach` to an already-running server.
    pub fn connect(
        addr: &str,
        events: Sender<SessionEvent>,
        tracer: Option<FileTracer>,
        trace_wire: bool,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|err| Error::ConnectFailed {
            addr: addr.to_string(),
            source: err,
        })?;
        stream.set_nodelay(true)?;
        let reader = FramedReader::new(stream.try_clone()?);
        debug!(target: "dap", "connected to backend at {addr}");

        let reader_tracer = tracer.clone();
        thread::spawn(move || read_loop(reader, events, reader_tracer, trace_wire));

        Ok(Self {
            writer: FramedWriter::new(stream),
            tracer,
            trace_wire,
        })
    }

    /// Forward a message to the backend verbatim.
    pub fn send(&mut self, message: &Value) -> Result<()> {
        if self.trace_wire {
            if let Some(tracer) = &self.tracer {
                tracer.wire("dlv<-", message);
            }
        }
        self.writer.write_message(message)
    }
}

/// Decode backend frames until the connection ends. A plain close is
/// reported as `Closed` (the session decides whether the process-exit signal
/// supersedes it); every other failure is a session-fatal transport fault.
fn read_loop(
    mut reader: FramedReader<TcpStream>,
    events: Sender<SessionEvent>,
    tracer: Option<FileTracer>,
    trace_wire: bool,
) {
    loop {
        match reader.read_message() {
            Ok(message) => {
                if trace_wire {
                    if let Some(tracer) = &tracer {
                        tracer.wire("dlv->", &message);
                    }
                }
                if events
                    .send(SessionEvent::Backend(BackendEvent::Message(message)))
                    .is_err()
                {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                let _ = events.send(SessionEvent::Backend(BackendEvent::Closed));
                break;
            }
            Err(err) => {
                let _ = events.send(SessionEvent::Backend(BackendEvent::TransportFault(
                    err.to_string(),
                )));
                break;
            }
        }
    }
}
