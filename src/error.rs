use std::path::PathBuf;

/// Largest DAP frame the relay will accept in either direction. Anything
/// bigger is treated as a transport fault and tears the session down.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- backend lifecycle -----------------------------------------
    #[error(
        "cannot find the Delve debugger at \"{0}\", install it from \
         https://github.com/go-delve/delve and make sure it is executable"
    )]
    BackendMissing(PathBuf),
    #[error("cannot find the `go` binary in PATH, needed to run the program without debugging")]
    GoBinaryMissing,
    #[error("failed to start \"{binary}\": {source}")]
    SpawnFailed {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to the backend DAP server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // --------------------------------- wire protocol ---------------------------------------------
    #[error("DAP connection closed")]
    ConnectionClosed,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("malformed Content-Length header: {0:?}")]
    MalformedContentLength(String),
    #[error("DAP frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    OversizedFrame(usize),

    // --------------------------------- launch configuration --------------------------------------
    #[error("the `program` attribute is missing in the debug configuration")]
    MissingProgram,
    #[error(
        "the `program` attribute must point to a valid directory, .go file or executable: \"{0}\""
    )]
    InvalidProgram(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
