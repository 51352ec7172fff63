use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serve the editor over a TCP listener instead of stdio.
    #[clap(long)]
    pub listen: Option<String>,

    /// Exit after the first debug session ends (single-client mode, TCP
    /// only).
    #[clap(long)]
    pub oneshot: bool,

    /// Optional log file for adapter diagnostics (no output to stdout).
    #[clap(long)]
    pub log_file: Option<std::path::PathBuf>,

    /// Trace DAP traffic (requests/responses/events) into the log file.
    /// Requires --log-file.
    #[clap(long)]
    pub trace_dap: bool,
}
