//! Typed views of the editor-supplied launch and attach configurations.
//!
//! Only the fields the relay itself inspects are modeled here; everything
//! else travels inside the raw request and reaches the backend untouched.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 42042;

/// Key inside the launch `env` map that overrides the backend binary path.
pub const BACKEND_PATH_ENV_KEY: &str = "dlvPath";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Debug,
    Remote,
    Test,
    Exec,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Verbose,
    Log,
    #[default]
    Error,
}

impl TraceLevel {
    /// Wire tracing is only wanted at the two chattier levels.
    pub fn traces_wire(&self) -> bool {
        !matches!(self, TraceLevel::Error)
    }
}

/// Delve LoadConfig parameters: variable-inspection limits forwarded to the
/// backend as-is.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadConfig {
    pub follow_pointers: bool,
    pub max_variable_recurse: i64,
    pub max_string_len: i64,
    pub max_array_values: i64,
    pub max_struct_fields: i64,
}

/// Arguments of a `launch` request. Unknown fields are ignored, they still
/// reach the backend through the forwarded raw request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchArguments {
    pub no_debug: bool,
    pub program: Option<String>,
    pub mode: Mode,
    pub stop_on_entry: bool,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub build_flags: Option<String>,
    #[serde(alias = "dlvToolPath")]
    pub backend_path: Option<String>,
    /// Override for the `go` binary used by no-debug runs.
    pub go_binary: Option<String>,
    pub api_version: Option<i64>,
    pub stack_trace_depth: Option<i64>,
    pub dlv_load_config: Option<LoadConfig>,
    pub trace: TraceLevel,
    pub show_log: Option<bool>,
    pub log_output: Option<String>,
    pub output: Option<String>,
}

impl LaunchArguments {
    pub fn parse(arguments: &Value) -> Result<Self> {
        serde_json::from_value(arguments.clone()).map_err(Error::from)
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_BACKEND_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_BACKEND_PORT)
    }

    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }
}

/// Arguments of an `attach` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachArguments {
    pub mode: Mode,
    pub process_id: Option<i64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "dlvToolPath")]
    pub backend_path: Option<String>,
    pub dlv_load_config: Option<LoadConfig>,
    pub stack_trace_depth: Option<i64>,
    pub trace: TraceLevel,
}

impl AttachArguments {
    pub fn parse(arguments: &Value) -> Result<Self> {
        serde_json::from_value(arguments.clone()).map_err(Error::from)
    }

    pub fn backend_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or(DEFAULT_BACKEND_HOST),
            self.port.unwrap_or(DEFAULT_BACKEND_PORT)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_full_launch_arguments() {
        let args = LaunchArguments::parse(&json!({
            "program": "/work/hello",
            "mode": "debug",
            "noDebug": true,
            "args": ["-v"],
            "env": { "FOO": "bar" },
            "buildFlags": "-tags=integration",
            "dlvToolPath": "/usr/bin/dlv",
            "apiVersion": 2,
            "stackTraceDepth": 50,
            "dlvLoadConfig": {
                "followPointers": true,
                "maxStringLen": 64,
                "maxArrayValues": 64,
                "maxStructFields": -1,
            },
            "trace": "verbose",
        }))
        .unwrap();

        assert!(args.no_debug);
        assert_eq!(args.mode, Mode::Debug);
        assert_eq!(args.program.as_deref(), Some("/work/hello"));
        assert_eq!(args.backend_path.as_deref(), Some("/usr/bin/dlv"));
        assert_eq!(args.env.get("FOO").map(String::as_str), Some("bar"));
        let load = args.dlv_load_config.unwrap();
        assert!(load.follow_pointers);
        assert_eq!(load.max_string_len, 64);
        assert_eq!(load.max_struct_fields, -1);
        assert!(args.trace.traces_wire());
    }

    #[test]
    fn defaults_apply_when_fields_are_absent() {
        let args = LaunchArguments::parse(&json!({ "program": "." })).unwrap();
        assert!(!args.no_debug);
        assert_eq!(args.mode, Mode::Auto);
        assert_eq!(args.backend_addr(), "127.0.0.1:42042");
        assert!(!args.trace.traces_wire());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let args = LaunchArguments::parse(&json!({
            "program": ".",
            "showGlobalVariables": true,
            "packagePathToGoModPathMap": {},
        }))
        .unwrap();
        assert_eq!(args.program.as_deref(), Some("."));
    }

    #[test]
    fn attach_arguments_default_to_the_backend_address() {
        let args = AttachArguments::parse(&json!({ "mode": "remote", "port": 9090 })).unwrap();
        assert_eq!(args.mode, Mode::Remote);
        assert_eq!(args.backend_addr(), "127.0.0.1:9090");
    }
}
