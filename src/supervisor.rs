//! Process Supervisor: spawns the backend debugger in headless DAP-server
//! mode and reports its lifecycle into the session event channel.
//!
//! The "listening" signal fires once, on the first stdout activity. That is
//! an approximation of "the server socket is bound"; the client side absorbs
//! the remaining race with a short fixed delay before connecting.

use crate::error::{Error, Result};
use crate::launch::{LaunchArguments, BACKEND_PATH_ENV_KEY};
use crate::session::{BackendEvent, SessionEvent};
use log::{debug, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;

/// Computed command line for a backend debugger spawn.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub addr: String,
}

impl BackendCommand {
    /// Compute the `dlv dap` invocation for a `launch` request.
    ///
    /// The `dlvPath` key in the launch `env` map overrides `backendPath`;
    /// with neither set the binary is looked up in `PATH`.
    pub fn from_launch(args: &LaunchArguments) -> Result<Self> {
        let binary = match args.env.get(BACKEND_PATH_ENV_KEY) {
            Some(path) => PathBuf::from(path),
            None => match &args.backend_path {
                Some(path) => PathBuf::from(path),
                None => {
                    which::which("dlv").map_err(|_| Error::BackendMissing("dlv".into()))?
                }
            },
        };
        if !binary.exists() {
            return Err(Error::BackendMissing(binary));
        }

        let addr = args.backend_addr();
        let mut dlv_args = vec!["dap".to_string(), format!("--listen={addr}")];
        if let Some(show_log) = args.show_log {
            dlv_args.push(format!("--log={show_log}"));
        }
        if let Some(log_output) = &args.log_output {
            dlv_args.push(format!("--log-output={log_output}"));
        }

        let cwd = match &args.cwd {
            Some(cwd) => PathBuf::from(cwd),
            None => match &args.program {
                Some(program) => program_dir(Path::new(program)),
                None => PathBuf::from("."),
            },
        };

        Ok(Self {
            binary,
            args: dlv_args,
            cwd,
            env: args.env.clone(),
            addr,
        })
    }
}

/// Directory containing `program`, or `program` itself if it already is one.
fn program_dir(program: &Path) -> PathBuf {
    if program.is_dir() {
        program.to_path_buf()
    } else {
        match program.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }
}

/// Handle to the spawned backend debugger process.
///
/// The child is reaped by a watcher thread; the handle only keeps the pid so
/// the session can kill the backend on teardown.
#[derive(Debug)]
pub struct BackendProcess {
    pid: Pid,
}

impl BackendProcess {
    /// Spawn the backend and start the stdout/stderr pumps and the exit
    /// watcher. All lifecycle is reported through `events`:
    /// `Listening` once, `Stdout`/`Stderr` continuously, `Exited` last.
    pub fn spawn(command: &BackendCommand, events: Sender<SessionEvent>) -> Result<Self> {
        info!(
            target: "dap",
            "running: {} {}",
            command.binary.display(),
            command.args.join(" ")
        );

        let mut child = Command::new(&command.binary)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    Error::BackendMissing(command.binary.clone())
                }
                _ => Error::SpawnFailed {
                    binary: command.binary.clone(),
                    source: err,
                },
            })?;

        let pid = Pid::from_raw(child.id() as i32);

        if let Some(mut stdout) = child.stdout.take() {
            let tx = events.clone();
            thread::spawn(move || {
                let mut listening = false;
                let mut buf = [0u8; 4096];
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                            if !listening {
                                listening = true;
                                if tx.send(SessionEvent::Backend(BackendEvent::Listening)).is_err() {
                                    break;
                                }
                            }
                            if tx
                                .send(SessionEvent::Backend(BackendEvent::Stdout(chunk)))
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            });
        }

        if let Some(mut stderr) = child.stderr.take() {
            let tx = events.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                            if tx
                                .send(SessionEvent::Backend(BackendEvent::Stderr(chunk)))
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            });
        }

        thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => {
                    if let Some(signal) = status.signal() {
                        debug!(target: "dap", "backend killed by signal {signal}");
                    } else {
                        debug!(target: "dap", "backend exited with {status}");
                    }
                    status.code()
                }
                Err(err) => {
                    warn!(target: "dap", "failed to wait for backend: {err}");
                    None
                }
            };
            let _ = events.send(SessionEvent::Backend(BackendEvent::Exited(code)));
        });

        Ok(Self { pid })
    }

    /// Kill the backend process. Reaping happens in the exit watcher.
    pub fn kill(&self) {
        if let Err(err) = kill(self.pid, Signal::SIGKILL) {
            if err != nix::errno::Errno::ESRCH {
                warn!(target: "dap", "failed to kill backend (pid {}): {err}", self.pid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::LaunchArguments;
    use serde_json::json;

    #[test]
    fn backend_command_uses_listen_and_log_flags() {
        let args = LaunchArguments::parse(&json!({
            "program": "/tmp",
            "backendPath": "/bin/true",
            "host": "127.0.0.1",
            "port": 43111,
            "showLog": true,
            "logOutput": "dap",
        }))
        .unwrap();
        let command = BackendCommand::from_launch(&args).unwrap();
        assert_eq!(command.binary, PathBuf::from("/bin/true"));
        assert_eq!(
            command.args,
            vec![
                "dap".to_string(),
                "--listen=127.0.0.1:43111".to_string(),
                "--log=true".to_string(),
                "--log-output=dap".to_string(),
            ]
        );
        assert_eq!(command.cwd, PathBuf::from("/tmp"));
    }

    #[test]
    fn env_map_overrides_the_backend_path() {
        let args = LaunchArguments::parse(&json!({
            "program": "/tmp",
            "backendPath": "/nonexistent/dlv",
            "env": { "dlvPath": "/bin/true" },
        }))
        .unwrap();
        let command = BackendCommand::from_launch(&args).unwrap();
        assert_eq!(command.binary, PathBuf::from("/bin/true"));
    }

    #[test]
    fn missing_backend_binary_is_an_actionable_error() {
        let args = LaunchArguments::parse(&json!({
            "program": "/tmp",
            "backendPath": "/nonexistent/dlv",
        }))
        .unwrap();
        let err = BackendCommand::from_launch(&args).unwrap_err();
        assert!(err.to_string().contains("cannot find the Delve debugger"));
    }
}
