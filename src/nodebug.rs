//! No-Debug Executor: runs the target program directly, bypassing the
//! backend debugger entirely.
//!
//! The child runs in its own process group so `disconnect`/`terminate` can
//! kill the whole tree, Go programs routinely spawn further subprocesses.

use crate::error::{Error, Result};
use crate::launch::LaunchArguments;
use crate::session::{SessionEvent, TargetEvent};
use log::{info, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How the validated `program` attribute is run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProgramKind {
    /// A package directory, run as `go run .` inside it.
    Directory,
    /// A `.go` source file, run as `go run <file>`.
    Source,
    /// An already-built executable, run directly.
    Executable,
}

#[derive(Debug)]
struct ProgramArg {
    path: PathBuf,
    dir: PathBuf,
    kind: ProgramKind,
}

/// Validate the `program` attribute: it must exist and be a directory, a
/// `.go` source file, or an executable. Resolves the working directory the
/// child will run in.
fn parse_program_arg(args: &LaunchArguments) -> Result<ProgramArg> {
    let program = args.program.as_deref().ok_or(Error::MissingProgram)?;
    let path = PathBuf::from(program);
    let metadata = std::fs::metadata(&path).map_err(|_| Error::InvalidProgram(path.clone()))?;

    let kind = if metadata.is_dir() {
        ProgramKind::Directory
    } else if path.extension().is_some_and(|ext| ext == "go") {
        ProgramKind::Source
    } else if metadata.permissions().mode() & 0o111 != 0 {
        ProgramKind::Executable
    } else {
        return Err(Error::InvalidProgram(path));
    };

    let dir = if kind == ProgramKind::Directory {
        path.clone()
    } else {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    };

    Ok(ProgramArg { path, dir, kind })
}

/// Handle to the directly-launched target. Only the process-group id is
/// kept; the exit watcher thread owns and reaps the child itself.
#[derive(Debug)]
pub struct TargetProcess {
    pgid: Pid,
}

/// Spawn the target for a "run without debugging" launch. Child stdout and
/// stderr are streamed into the session channel as tagged output; the exit
/// watcher reports termination.
pub fn launch(args: &LaunchArguments, events: Sender<SessionEvent>) -> Result<TargetProcess> {
    let program = parse_program_arg(args)?;

    let mut command = match program.kind {
        ProgramKind::Executable => {
            let mut command = Command::new(&program.path);
            command.args(&args.args);
            command
        }
        ProgramKind::Directory | ProgramKind::Source => {
            let go_binary = match &args.go_binary {
                Some(path) => PathBuf::from(path),
                None => which::which("go").map_err(|_| Error::GoBinaryMissing)?,
            };
            let mut command = Command::new(go_binary);
            command.arg("run");
            if let Some(build_flags) = &args.build_flags {
                command.arg(build_flags);
            }
            if program.kind == ProgramKind::Directory {
                command.arg(".");
            } else {
                command.arg(&program.path);
            }
            command.args(&args.args);
            command
        }
    };

    info!(
        target: "dap",
        "running without debugging: {:?} (cwd: {})",
        command,
        program.dir.display()
    );

    // Launch-time env overrides the inherited environment.
    let mut child = command
        .current_dir(&program.dir)
        .envs(&args.env)
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Error::InvalidProgram(program.path.clone())
            }
            _ => Error::SpawnFailed {
                binary: program.path.clone(),
                source: err,
            },
        })?;

    let pgid = Pid::from_raw(child.id() as i32);

    if let Some(stdout) = child.stdout.take() {
        spawn_output_pump(stdout, "stdout", events.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_output_pump(stderr, "stderr", events.clone());
    }

    thread::spawn(move || {
        let code = match child.wait() {
            Ok(status) => {
                if let Some(signal) = status.signal() {
                    info!(target: "dap", "target killed by signal {signal}");
                }
                status.code()
            }
            Err(err) => {
                warn!(target: "dap", "failed to wait for target: {err}");
                None
            }
        };
        let _ = events.send(SessionEvent::Target(TargetEvent::Exited(code)));
    });

    Ok(TargetProcess { pgid })
}

fn spawn_output_pump<R: Read + Send + 'static>(
    mut stream: R,
    category: &'static str,
    events: Sender<SessionEvent>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if events
                        .send(SessionEvent::Target(TargetEvent::Output { category, chunk }))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });
}

impl TargetProcess {
    pub fn pid(&self) -> Pid {
        self.pgid
    }

    /// Kill the whole process tree and block until no group member is left.
    /// Callers acknowledge `disconnect` only after this returns.
    pub fn kill_tree(&self) {
        info!(target: "dap", "killing target process group {}", self.pgid);
        if let Err(err) = killpg(self.pgid, Signal::SIGKILL) {
            if err != nix::errno::Errno::ESRCH {
                warn!(target: "dap", "failed to kill process group {}: {err}", self.pgid);
            }
            return;
        }

        let deadline = Instant::now() + KILL_CONFIRM_TIMEOUT;
        while Instant::now() < deadline {
            // Signal 0 probes for surviving group members.
            match killpg(self.pgid, None) {
                Err(nix::errno::Errno::ESRCH) => return,
                _ => thread::sleep(KILL_POLL_INTERVAL),
            }
        }
        warn!(
            target: "dap",
            "process group {} still has members after {:?}",
            self.pgid,
            KILL_CONFIRM_TIMEOUT
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn launch_args(value: serde_json::Value) -> LaunchArguments {
        LaunchArguments::parse(&value).unwrap()
    }

    #[test]
    fn missing_program_attribute_is_rejected() {
        let args = launch_args(json!({ "noDebug": true, "mode": "debug" }));
        assert!(matches!(
            parse_program_arg(&args),
            Err(Error::MissingProgram)
        ));
    }

    #[test]
    fn nonexistent_program_is_rejected() {
        let args = launch_args(json!({ "program": "/definitely/not/here" }));
        assert!(matches!(
            parse_program_arg(&args),
            Err(Error::InvalidProgram(_))
        ));
    }

    #[test]
    fn directory_program_runs_the_package_in_place() {
        let args = launch_args(json!({ "program": "/tmp" }));
        let program = parse_program_arg(&args).unwrap();
        assert_eq!(program.kind, ProgramKind::Directory);
        assert_eq!(program.dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn executable_program_is_accepted_without_go_suffix() {
        let args = launch_args(json!({ "program": "/bin/sh" }));
        let program = parse_program_arg(&args).unwrap();
        assert_eq!(program.kind, ProgramKind::Executable);
        assert_eq!(program.dir, PathBuf::from("/bin"));
    }

    #[test]
    fn plain_file_without_exec_bit_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut perms = file.as_file().metadata().unwrap().permissions();
        perms.set_mode(0o644);
        file.as_file().set_permissions(perms).unwrap();
        let args = launch_args(json!({ "program": file.path() }));
        assert!(matches!(
            parse_program_arg(&args),
            Err(Error::InvalidProgram(_))
        ));
    }
}
