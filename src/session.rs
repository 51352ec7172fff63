//! Relay Session: the editor-facing DAP server.
//!
//! ```text
//!      Editor                  Session                     Delve
//!  +------------+       +---------+----------+        +------------+
//!  | DAP client | <===> | server  |  client  |  <===> | DAP server |
//!  +------------+       +---------+----------+        +------------+
//! ```
//!
//! Nearly every request is forwarded to the backend verbatim and every
//! backend response/event is relayed back unchanged, in arrival order. Only
//! the lifecycle commands (`initialize`, `launch`, `attach`, `disconnect`,
//! `terminate`) get dedicated handlers, because they drive the process
//! supervisor and the socket bridge. Adding a new DAP request kind needs no
//! code here at all.

use crate::client::BackendClient;
use crate::error::Error;
use crate::launch::{AttachArguments, LaunchArguments, Mode};
use crate::nodebug::{self, TargetProcess};
use crate::protocol::{self, DapEvent, DapResponse};
use crate::supervisor::{BackendCommand, BackendProcess};
use crate::tracer::FileTracer;
use crate::transport::{MessageReader, MessageWriter};
use anyhow::Context;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// Everything the session reacts to, multiplexed into one channel so the
/// event loop stays single-threaded and arrival order is preserved.
pub enum SessionEvent {
    /// Decoded message from the editor.
    Editor(Value),
    /// The editor-facing transport reached end of stream.
    EditorClosed,
    /// The editor-facing transport failed.
    EditorFault(String),
    Backend(BackendEvent),
    Target(TargetEvent),
}

/// Lifecycle and traffic of the backend debugger.
pub enum BackendEvent {
    /// First stdout activity, the backend is assumed ready to accept
    /// connections.
    Listening,
    /// Decoded message from the backend socket.
    Message(Value),
    /// Backend stdout chunk (diagnostics only, never protocol data).
    Stdout(String),
    /// Backend stderr chunk.
    Stderr(String),
    /// The backend socket reached end of stream.
    Closed,
    /// The backend socket failed or produced an undecodable frame.
    TransportFault(String),
    /// The backend process exited.
    Exited(Option<i32>),
}

/// Lifecycle of a target launched without debugging.
pub enum TargetEvent {
    Output {
        category: &'static str,
        chunk: String,
    },
    Exited(Option<i32>),
}

/// Session state. At most one of a backend connection or a directly-run
/// target exists at any time; the variants make the illegal combinations
/// unrepresentable.
enum Phase {
    Uninitialized,
    Ready,
    /// Backend spawned, socket not yet connected. The original `launch`
    /// request and any requests that raced ahead are forwarded on connect.
    LaunchingBackend {
        process: BackendProcess,
        launch: Value,
        addr: String,
        queued: Vec<Value>,
    },
    /// Connected to the backend; `process` is `None` for a remote attach.
    Relaying {
        process: Option<BackendProcess>,
        client: BackendClient,
    },
    RunningDirect {
        target: TargetProcess,
    },
    Terminated,
}

pub struct Session<W: MessageWriter> {
    writer: W,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    phase: Phase,
    /// Forwarded requests awaiting a backend response: seq -> command.
    pending: HashMap<i64, String>,
    /// Sequence counter for locally synthesized responses and events.
    next_seq: i64,
    tracer: Option<FileTracer>,
    trace_wire: bool,
}

/// Serve one debug session over the given editor-facing transport halves.
pub fn serve<R, W>(reader: R, writer: W, tracer: Option<FileTracer>, trace_wire: bool) -> anyhow::Result<()>
where
    R: MessageReader + 'static,
    W: MessageWriter,
{
    let (tx, rx) = mpsc::channel();
    let editor_tx = tx.clone();
    thread::spawn(move || editor_read_loop(reader, editor_tx));
    Session::new(writer, tx, rx, tracer, trace_wire).run()
}

fn editor_read_loop<R: MessageReader>(mut reader: R, tx: Sender<SessionEvent>) {
    loop {
        match reader.read_message() {
            Ok(message) => {
                if tx.send(SessionEvent::Editor(message)).is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                let _ = tx.send(SessionEvent::EditorClosed);
                break;
            }
            Err(err) => {
                let _ = tx.send(SessionEvent::EditorFault(err.to_string()));
                break;
            }
        }
    }
}

impl<W: MessageWriter> Session<W> {
    pub fn new(
        writer: W,
        events_tx: Sender<SessionEvent>,
        events_rx: Receiver<SessionEvent>,
        tracer: Option<FileTracer>,
        trace_wire: bool,
    ) -> Self {
        Self {
            writer,
            events_tx,
            events_rx,
            phase: Phase::Uninitialized,
            pending: HashMap::new(),
            next_seq: 1,
            tracer,
            trace_wire,
        }
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let result = self.run_loop();
        self.teardown();
        result
    }

    fn run_loop(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events_rx.recv() {
            match event {
                SessionEvent::Editor(message) => self.on_editor_message(message)?,
                SessionEvent::EditorClosed => {
                    info!(target: "dap", "editor disconnected");
                    break;
                }
                SessionEvent::EditorFault(fault) => {
                    warn!(target: "dap", "editor transport fault: {fault}");
                    break;
                }
                SessionEvent::Backend(event) => self.on_backend_event(event)?,
                SessionEvent::Target(event) => self.on_target_event(event)?,
            }
        }
        Ok(())
    }

    // ---------------------------------- editor side ----------------------------------------------

    fn on_editor_message(&mut self, message: Value) -> anyhow::Result<()> {
        self.trace("ed->", &message);

        if protocol::message_type(&message) != Some("request") {
            debug!(target: "dap", "ignoring non-request editor message");
            return Ok(());
        }
        let (Some(seq), Some(command)) = (
            protocol::request_seq(&message),
            protocol::command(&message).map(str::to_string),
        ) else {
            warn!(target: "dap", "editor request without seq/command");
            return Ok(());
        };

        if matches!(self.phase, Phase::Uninitialized) && command != "initialize" {
            return self.respond_error(seq, &command, "the debug adapter is not initialized");
        }

        match command.as_str() {
            "initialize" => self.on_initialize(seq),
            "launch" => self.on_launch(seq, message),
            "attach" => self.on_attach(seq, message),
            "disconnect" => self.on_disconnect(seq, message),
            "terminate" => self.on_terminate(seq, message),
            _ => self.forward(seq, &command, message),
        }
    }

    /// Answered locally: the backend has not been launched yet, the
    /// `launch`/`attach` request is what tells us how to start it.
    fn on_initialize(&mut self, seq: i64) -> anyhow::Result<()> {
        if matches!(self.phase, Phase::Uninitialized) {
            self.phase = Phase::Ready;
        }
        let capabilities = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsConditionalBreakpoints": true,
            "supportsSetVariable": true,
        });
        self.respond_success(seq, "initialize", Some(capabilities))
    }

    fn on_launch(&mut self, seq: i64, message: Value) -> anyhow::Result<()> {
        if !matches!(self.phase, Phase::Ready) {
            return self.respond_error(seq, "launch", "a debug session is already active");
        }

        let arguments = message.get("arguments").cloned().unwrap_or(Value::Null);
        let args = match LaunchArguments::parse(&arguments) {
            Ok(args) => args,
            Err(err) => {
                return self.respond_error(seq, "launch", &format!("invalid launch arguments: {err}"))
            }
        };
        if args.trace.traces_wire() {
            self.trace_wire = true;
        }

        // "Run without debugging" never touches the backend debugger. Other
        // launch modes still defer to the backend even with noDebug set, for
        // compatibility with its own handling.
        if args.no_debug && args.mode == Mode::Debug {
            return match nodebug::launch(&args, self.events_tx.clone()) {
                Ok(target) => {
                    self.phase = Phase::RunningDirect { target };
                    self.respond_success(seq, "launch", None)
                }
                Err(err) => {
                    self.respond_error(seq, "launch", &format!("failed to launch: {err}"))
                }
            };
        }

        let command = match BackendCommand::from_launch(&args) {
            Ok(command) => command,
            Err(err) => return self.abort_session(seq, "launch", &err.to_string()),
        };
        match BackendProcess::spawn(&command, self.events_tx.clone()) {
            Ok(process) => {
                // The launch response comes from the backend once the
                // request is forwarded after connect.
                self.pending.insert(seq, "launch".to_string());
                self.phase = Phase::LaunchingBackend {
                    process,
                    launch: message,
                    addr: command.addr,
                    queued: Vec::new(),
                };
                Ok(())
            }
            Err(err) => self.abort_session(seq, "launch", &err.to_string()),
        }
    }

    /// Attach needs no local launch sequencing: connect (if not already
    /// connected) and forward.
    fn on_attach(&mut self, seq: i64, message: Value) -> anyhow::Result<()> {
        match &mut self.phase {
            Phase::Ready => {
                let arguments = message.get("arguments").cloned().unwrap_or(Value::Null);
                let args = match AttachArguments::parse(&arguments) {
                    Ok(args) => args,
                    Err(err) => {
                        return self.respond_error(
                            seq,
                            "attach",
                            &format!("invalid attach arguments: {err}"),
                        )
                    }
                };
                if args.trace.traces_wire() {
                    self.trace_wire = true;
                }
                let addr = args.backend_addr();
                match BackendClient::connect(
                    &addr,
                    self.events_tx.clone(),
                    self.tracer.clone(),
                    self.trace_wire,
                ) {
                    Ok(client) => {
                        self.phase = Phase::Relaying {
                            process: None,
                            client,
                        };
                        self.forward(seq, "attach", message)
                    }
                    Err(err) => self.abort_session(seq, "attach", &err.to_string()),
                }
            }
            Phase::Relaying { .. } | Phase::LaunchingBackend { .. } => {
                self.forward(seq, "attach", message)
            }
            _ => self.respond_error(seq, "attach", "cannot attach in the current session state"),
        }
    }

    fn on_disconnect(&mut self, seq: i64, message: Value) -> anyhow::Result<()> {
        debug!(target: "dap", "disconnect requested");
        match &self.phase {
            // The target was spawned directly: kill its whole process tree
            // and acknowledge only once the tree is confirmed dead.
            Phase::RunningDirect { target } => {
                info!(target: "dap", "killing debuggee (pid: {})...", target.pid());
                target.kill_tree();
                self.phase = Phase::Terminated;
                self.respond_success(seq, "disconnect", None)?;
                self.emit_terminated()
            }
            // Let the backend perform its own shutdown sequence.
            Phase::Relaying { .. } | Phase::LaunchingBackend { .. } => {
                self.forward(seq, "disconnect", message)
            }
            // Editors retry disconnect during shutdown races; after the
            // session ended this must stay a no-op success.
            Phase::Terminated => self.respond_success(seq, "disconnect", None),
            Phase::Ready | Phase::Uninitialized => {
                self.respond_error(seq, "disconnect", "nothing to disconnect")
            }
        }
    }

    fn on_terminate(&mut self, seq: i64, message: Value) -> anyhow::Result<()> {
        match &self.phase {
            Phase::Relaying { .. } | Phase::LaunchingBackend { .. } => {
                self.forward(seq, "terminate", message)
            }
            Phase::RunningDirect { target } => {
                info!(target: "dap", "killing debuggee (pid: {})...", target.pid());
                target.kill_tree();
                self.phase = Phase::Terminated;
                self.respond_success(seq, "terminate", None)?;
                self.emit_terminated()
            }
            _ => self.respond_error(seq, "terminate", "no debug session to terminate"),
        }
    }

    /// Default path: pass the request through to the backend unmodified.
    /// The backend owns all debugging semantics, this core only does framing
    /// and lifecycle.
    fn forward(&mut self, seq: i64, command: &str, message: Value) -> anyhow::Result<()> {
        match &mut self.phase {
            Phase::Relaying { client, .. } => {
                self.pending.insert(seq, command.to_string());
                if let Err(err) = client.send(&message) {
                    return self.on_backend_event(BackendEvent::TransportFault(err.to_string()));
                }
                Ok(())
            }
            Phase::LaunchingBackend { queued, .. } => {
                self.pending.insert(seq, command.to_string());
                queued.push(message);
                Ok(())
            }
            Phase::RunningDirect { .. } => self.respond_error(
                seq,
                command,
                "request not available when running without debugging",
            ),
            Phase::Terminated => {
                self.respond_error(seq, command, "the debug session has ended")
            }
            Phase::Ready | Phase::Uninitialized => {
                self.respond_error(seq, command, "no debug session is active")
            }
        }
    }

    // ---------------------------------- backend side ---------------------------------------------

    fn on_backend_event(&mut self, event: BackendEvent) -> anyhow::Result<()> {
        match event {
            BackendEvent::Listening => self.on_backend_listening(),
            BackendEvent::Message(message) => self.on_backend_message(message),
            BackendEvent::Stdout(chunk) => {
                debug!(target: "dap", "dlv stdout: {}", chunk.trim_end());
                Ok(())
            }
            BackendEvent::Stderr(chunk) => {
                debug!(target: "dap", "dlv stderr: {}", chunk.trim_end());
                Ok(())
            }
            BackendEvent::Closed => {
                // With a supervised process the exit signal supersedes the
                // socket close; a remote attach has no exit signal to wait
                // for.
                if matches!(self.phase, Phase::Relaying { process: None, .. }) {
                    self.phase = Phase::Terminated;
                    self.finish_session("the DAP server closed the connection")?;
                }
                Ok(())
            }
            BackendEvent::TransportFault(fault) => self.on_backend_fault(&fault),
            BackendEvent::Exited(code) => self.on_backend_exited(code),
        }
    }

    /// The backend signalled readiness: open the socket bridge, forward the
    /// original `launch` request and flush whatever raced ahead of the
    /// connection.
    fn on_backend_listening(&mut self) -> anyhow::Result<()> {
        let phase = std::mem::replace(&mut self.phase, Phase::Terminated);
        let Phase::LaunchingBackend {
            process,
            launch,
            addr,
            queued,
        } = phase
        else {
            self.phase = phase;
            return Ok(());
        };

        match BackendClient::connect_after_ready(
            &addr,
            self.events_tx.clone(),
            self.tracer.clone(),
            self.trace_wire,
        ) {
            Ok(mut client) => {
                let mut result = client.send(&launch);
                if result.is_ok() {
                    for message in &queued {
                        result = client.send(message);
                        if result.is_err() {
                            break;
                        }
                    }
                }
                match result {
                    Ok(()) => {
                        self.phase = Phase::Relaying {
                            process: Some(process),
                            client,
                        };
                        Ok(())
                    }
                    Err(err) => {
                        warn!(target: "dap", "failed to forward to backend: {err}");
                        process.kill();
                        self.finish_session(&format!("transport fault: {err}"))
                    }
                }
            }
            Err(err) => {
                warn!(target: "dap", "backend connect failed: {err}");
                process.kill();
                self.finish_session(&err.to_string())
            }
        }
    }

    fn on_backend_message(&mut self, message: Value) -> anyhow::Result<()> {
        match protocol::message_type(&message) {
            Some("response") => {
                match protocol::response_request_seq(&message) {
                    Some(request_seq) => {
                        if self.pending.remove(&request_seq).is_none() {
                            debug!(target: "dap", "response for unknown request {request_seq}");
                        }
                    }
                    None => warn!(target: "dap", "backend response without request_seq"),
                }
                self.relay_to_editor(&message)
            }
            // Events (and reverse requests such as runInTerminal) are
            // relayed unchanged, in arrival order.
            Some("event") | Some("request") => self.relay_to_editor(&message),
            _ => {
                warn!(target: "dap", "dropping unknown backend message kind");
                Ok(())
            }
        }
    }

    fn on_backend_fault(&mut self, fault: &str) -> anyhow::Result<()> {
        let Some(process) = self.take_backend() else {
            return Ok(());
        };
        if let Some(process) = process {
            process.kill();
        }
        warn!(target: "dap", "backend transport fault: {fault}");
        self.emit_output("console", &format!("DAP transport fault: {fault}\n"))?;
        self.finish_session(&format!("transport fault: {fault}"))
    }

    /// A backend exit with requests still in flight is a crash: each pending
    /// request gets a synthesized terminal outcome, then the editor is told
    /// the session is over. A pending `disconnect`/`terminate` completes
    /// successfully, the teardown it asked for has happened.
    fn on_backend_exited(&mut self, code: Option<i32>) -> anyhow::Result<()> {
        if self.take_backend().is_none() {
            return Ok(());
        }

        let message = match code {
            Some(0) => "the debugger backend exited".to_string(),
            Some(code) => format!(
                "the debugger backend exited unexpectedly (code {code}): check the debug console for details"
            ),
            None => "the debugger backend was killed".to_string(),
        };
        if code != Some(0) {
            warn!(target: "dap", "{message}");
        }
        info!(target: "dap", "sending terminated event, backend is gone");
        self.finish_session(&message)
    }

    // ---------------------------------- no-debug side --------------------------------------------

    fn on_target_event(&mut self, event: TargetEvent) -> anyhow::Result<()> {
        match event {
            TargetEvent::Output { category, chunk } => {
                if matches!(self.phase, Phase::RunningDirect { .. }) {
                    self.emit_output(category, &chunk)?;
                }
                Ok(())
            }
            TargetEvent::Exited(code) => {
                if matches!(self.phase, Phase::RunningDirect { .. }) {
                    info!(target: "dap", "target exited with code {code:?}");
                    self.phase = Phase::Terminated;
                    self.emit_terminated()?;
                }
                Ok(())
            }
        }
    }

    // ---------------------------------- plumbing -------------------------------------------------

    /// Synthesize a terminal outcome for every in-flight request. Ordinary
    /// requests get an error; a pending `disconnect`/`terminate` succeeds so
    /// the disconnecting request always completes.
    fn fail_pending(&mut self, message: &str) -> anyhow::Result<()> {
        self.phase = Phase::Terminated;
        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_by_key(|(seq, _)| *seq);
        for (seq, command) in pending {
            if command == "disconnect" || command == "terminate" {
                self.respond_success(seq, &command, None)?;
            } else {
                self.respond_error(seq, &command, message)?;
            }
        }
        Ok(())
    }

    /// Common tail of every backend teardown: synthesize terminal outcomes
    /// for the in-flight requests, then tell the editor the session is over.
    fn finish_session(&mut self, message: &str) -> anyhow::Result<()> {
        self.fail_pending(message)?;
        self.emit_terminated()
    }

    /// Fail a session-starting request: error response, then the session is
    /// over before it began.
    fn abort_session(&mut self, seq: i64, command: &str, message: &str) -> anyhow::Result<()> {
        self.respond_error(seq, command, message)?;
        self.phase = Phase::Terminated;
        self.emit_terminated()
    }

    /// Move to `Terminated` and hand back the owned backend process, if the
    /// current phase holds a backend at all.
    fn take_backend(&mut self) -> Option<Option<BackendProcess>> {
        let phase = std::mem::replace(&mut self.phase, Phase::Terminated);
        match phase {
            Phase::Relaying { process, .. } => Some(process),
            Phase::LaunchingBackend { process, .. } => Some(Some(process)),
            Phase::Terminated => None,
            other => {
                self.phase = other;
                None
            }
        }
    }

    fn relay_to_editor(&mut self, message: &Value) -> anyhow::Result<()> {
        self.trace("ed<-", message);
        self.writer
            .write_message(message)
            .context("write to editor")
    }

    fn respond_success(
        &mut self,
        request_seq: i64,
        command: &str,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        let seq = self.bump_seq();
        let response = DapResponse::success(seq, request_seq, command, body);
        let value = serde_json::to_value(&response)?;
        self.relay_to_editor(&value)
    }

    fn respond_error(&mut self, request_seq: i64, command: &str, message: &str) -> anyhow::Result<()> {
        let seq = self.bump_seq();
        let response = DapResponse::error(seq, request_seq, command, message);
        let value = serde_json::to_value(&response)?;
        self.relay_to_editor(&value)
    }

    fn emit_terminated(&mut self) -> anyhow::Result<()> {
        let seq = self.bump_seq();
        let event = serde_json::to_value(DapEvent::terminated(seq))?;
        self.relay_to_editor(&event)
    }

    fn emit_output(&mut self, category: &str, output: &str) -> anyhow::Result<()> {
        let seq = self.bump_seq();
        let event = serde_json::to_value(DapEvent::output(seq, category, output))?;
        self.relay_to_editor(&event)
    }

    fn bump_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn trace(&self, dir: &str, message: &Value) {
        if self.trace_wire {
            if let Some(tracer) = &self.tracer {
                tracer.wire(dir, message);
            }
        }
    }

    /// Last line of defence: whatever the session still owns when the event
    /// loop ends is killed, no exit path may leak a process.
    fn teardown(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::Terminated);
        match phase {
            Phase::RunningDirect { target } => target.kill_tree(),
            Phase::LaunchingBackend { process, .. } => process.kill(),
            Phase::Relaying { process, .. } => {
                if let Some(process) = process {
                    process.kill();
                }
            }
            Phase::Uninitialized | Phase::Ready | Phase::Terminated => {}
        }
    }
}
