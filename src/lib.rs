//! DAP relay for the Delve debugger.
//!
//! The relay presents itself to an editor as a standard DAP debug-adapter
//! server. For a debug launch it spawns `dlv dap`, bridges a TCP socket to
//! it and forwards the whole protocol in both directions; for a launch with
//! `noDebug` it runs the target program directly and synthesizes the few
//! events needed to report its output and termination.

pub mod args;
pub mod client;
pub mod error;
pub mod launch;
pub mod nodebug;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod tracer;
pub mod transport;
