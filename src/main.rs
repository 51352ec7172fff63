//! dlvrelay - a DAP relay for the Delve debugger.
//!
//! Serves the Debug Adapter Protocol to an editor (over stdio, or over TCP
//! in server mode) and proxies every message to a `dlv dap` backend; in
//! "run without debugging" mode the target program is spawned directly.

use anyhow::Context;
use clap::Parser;
use dlvrelay::args::Args;
use dlvrelay::session;
use dlvrelay::tracer::FileTracer;
use dlvrelay::transport;
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let tracer = match &args.log_file {
        Some(path) => Some(FileTracer::new(path)?),
        None => None,
    };
    if args.trace_dap && tracer.is_none() {
        warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
    }
    let trace_wire = args.trace_dap && tracer.is_some();

    let Some(listen) = &args.listen else {
        // Embedded mode: the editor spawned us and owns our stdio.
        let (reader, writer) = transport::stdio_endpoint();
        return session::serve(reader, writer, tracer, trace_wire);
    };

    let addr: SocketAddr = listen.parse().context("invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "dlvrelay listening on {addr}");

    // Server mode: accept clients sequentially. One client == one debug
    // session.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "editor connected: {peer}");
        if let Some(t) = &tracer {
            t.line(&format!("editor connected: {peer}"));
        }

        let res = match transport::tcp_endpoint(stream) {
            Ok((reader, writer)) => session::serve(reader, writer, tracer.clone(), trace_wire),
            Err(err) => {
                warn!(target: "dap", "failed to init DAP I/O: {err:#}");
                continue;
            }
        };
        if let Err(err) = res {
            warn!(target: "dap", "session ended with error: {err:#}");
            if let Some(t) = &tracer {
                t.line(&format!("session error: {err:#}"));
            }
        } else if let Some(t) = &tracer {
            t.line("session finished OK");
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}
