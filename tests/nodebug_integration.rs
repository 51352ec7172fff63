//! End-to-end tests of "run without debugging". The targets are small shell
//! scripts, which exercise the executable program path without needing a Go
//! toolchain; the backend binary is deliberately invalid to prove the
//! debugger is never touched.


use relay_client::{pid_alive, wait_pid_gone, write_script, RelaySession};
use serde_json::{json, Value};
use serial_test::serial;
use std::time::Duration;

fn no_debug_arguments(program: &std::path::Path) -> Value {
    json!({
        "noDebug": true,
        "mode": "debug",
        "program": program,
        "backendPath": "/nonexistent/dlv",
    })
}

/// Collect output events of one category until `terminated` arrives.
fn drain_output(session: &mut RelaySession, category: &str) -> String {
    let mut collected = String::new();
    loop {
        let event = session.client.read_event().unwrap();
        match event["event"].as_str() {
            Some("terminated") => return collected,
            Some("output") if event["body"]["category"] == category => {
                collected.push_str(event["body"]["output"].as_str().unwrap());
            }
            _ => {}
        }
    }
}

#[test]
#[serial]
fn run_without_debugging_streams_stdout_and_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "hello", "#!/bin/sh\necho \"Hello, World!\"\n").unwrap();

    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();
    let seq = session
        .client
        .send_request("launch", no_debug_arguments(&script))
        .unwrap();
    let response = session.client.read_response(seq).unwrap();
    assert_eq!(response["success"], true);

    let stdout = drain_output(&mut session, "stdout");
    assert_eq!(stdout, "Hello, World!\n");

    // Disconnect after the target already exited is a no-op success.
    let seq = session.client.send_request("disconnect", json!({})).unwrap();
    let response = session.client.read_response(seq).unwrap();
    assert_eq!(response["success"], true);
    session.shutdown();
}

#[test]
#[serial]
fn stderr_output_is_tagged_separately() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "noisy", "#!/bin/sh\necho oops >&2\n").unwrap();

    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();
    let seq = session
        .client
        .send_request("launch", no_debug_arguments(&script))
        .unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);

    let stderr = drain_output(&mut session, "stderr");
    assert_eq!(stderr, "oops\n");
    session.shutdown();
}

#[test]
#[serial]
fn program_args_and_env_reach_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echoer", "#!/bin/sh\necho \"$1-$RELAY_TEST\"\n").unwrap();

    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();
    let mut arguments = no_debug_arguments(&script);
    arguments["args"] = json!(["first"]);
    arguments["env"] = json!({ "RELAY_TEST": "injected" });
    let seq = session.client.send_request("launch", arguments).unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);

    let stdout = drain_output(&mut session, "stdout");
    assert_eq!(stdout, "first-injected\n");
    session.shutdown();
}

#[test]
#[serial]
fn disconnect_kills_the_whole_process_tree() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "forker",
        "#!/bin/sh\nsleep 300 &\necho $! > \"$(dirname \"$0\")/grandchild.pid\"\necho started\nwait\n",
    )
    .unwrap();

    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();
    let seq = session
        .client
        .send_request("launch", no_debug_arguments(&script))
        .unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);
    let started = session.client.wait_for_event("output").unwrap();
    assert!(started["body"]["output"].as_str().unwrap().contains("started"));

    let grandchild: i32 = std::fs::read_to_string(dir.path().join("grandchild.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(pid_alive(grandchild));

    // The disconnect acknowledgement must come after the whole tree is dead.
    let seq = session.client.send_request("disconnect", json!({})).unwrap();
    let response = session.client.read_response(seq).unwrap();
    assert_eq!(response["success"], true);
    assert!(wait_pid_gone(grandchild, Duration::from_secs(1)));
    session.client.wait_for_event("terminated").unwrap();

    // Retried disconnects during shutdown races stay successful.
    let seq = session.client.send_request("disconnect", json!({})).unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);
    session.shutdown();
}

#[test]
#[serial]
fn debug_requests_are_rejected_while_running_direct() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "sleeper", "#!/bin/sh\nsleep 300\n").unwrap();

    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();
    let seq = session
        .client
        .send_request("launch", no_debug_arguments(&script))
        .unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);

    let seq = session.client.send_request("threads", json!({})).unwrap();
    let response = session.client.read_response(seq).unwrap();
    assert_eq!(response["success"], false);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("running without debugging"));
    session.shutdown();
}

#[test]
#[serial]
fn invalid_program_fails_the_launch_but_keeps_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = RelaySession::start().unwrap();
    session.initialize().unwrap();

    let seq = session
        .client
        .send_request("launch", no_debug_arguments(std::path::Path::new("/definitely/missing")))
        .unwrap();
    let response = session.client.read_response(seq).unwrap();
    assert_eq!(response["success"], false);
    assert!(response["message"].as_str().unwrap().contains("failed to launch"));

    // The adapter stays usable, a corrected launch goes through.
    let script = write_script(dir.path(), "hello", "#!/bin/sh\necho hi\n").unwrap();
    let seq = session
        .client
        .send_request("launch", no_debug_arguments(&script))
        .unwrap();
    assert_eq!(session.client.read_response(seq).unwrap()["success"], true);
    let stdout = drain_output(&mut session, "stdout");
    assert_eq!(stdout, "hi\n");
    session.shutdown();
}
