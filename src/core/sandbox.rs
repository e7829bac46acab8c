//! Smoke-test execution of untrusted handler code.
//!
//! The handler runs as `<interpreter> <handler>` in a child process:
//!
//! - environment cleared, `HOME`/`TMPDIR` pointed at a scratch directory that is
//!   also the working directory and is removed afterwards
//! - the synthetic event is written to stdin, stdout/stderr are drained on
//!   their own threads and capped at `max_output_bytes`
//! - one wall-clock deadline covers both the child's exit and the draining of
//!   its output; missing it is a `HandlerTimeoutError`
//!
//! Only the direct child is killed on timeout. A background job that keeps the
//! output pipes open no longer holds up the run once the deadline passes, but
//! it is left to exit on its own.

use crate::core::config::SmokeTestOptions;
use crate::core::contract::Contract;
use crate::core::error::{HandlerExecutionError, PluginGateError, ProposalContractError};
use crate::core::output;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const SAMPLE_CONTENT: &[u8] = b"plugin-gate smoke test sample\n";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The event every handler receives during validation: the plugin's own
/// lifecycle event with a representative file tuple as inputs.
pub fn synthetic_event(event_name: &str) -> Value {
    json!({
        "name": event_name,
        "inputs": {
            "path": "inbox/sample-document.txt",
            "size": SAMPLE_CONTENT.len(),
            "sha256": sha256_hex(SAMPLE_CONTENT),
            "mime": "text/plain"
        }
    })
}

#[derive(Debug, Clone)]
pub struct HandlerRun {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

type Captured = (Vec<u8>, bool);

fn capture<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> mpsc::Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let Some(mut stream) = stream else {
            let _ = tx.send((buf, false));
            return;
        };
        let _ = stream.by_ref().take(limit as u64).read_to_end(&mut buf);
        // Keep draining so a chatty handler never blocks on a full pipe.
        let overflow = io::copy(&mut stream, &mut io::sink()).unwrap_or(0);
        let _ = tx.send((buf, overflow > 0));
    });
    rx
}

/// Wait for a reader until `deadline`. `None` means the pipe is still held
/// open, typically by a process the handler left running.
fn collect(rx: &mpsc::Receiver<Captured>, deadline: Instant) -> Option<Captured> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(captured) => Some(captured),
        Err(mpsc::RecvTimeoutError::Disconnected) => Some((Vec::new(), false)),
        Err(mpsc::RecvTimeoutError::Timeout) => None,
    }
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Run the handler once with `event` on stdin.
pub fn run_handler(
    handler: &Path,
    event: &Value,
    opts: &SmokeTestOptions,
) -> Result<HandlerRun, HandlerExecutionError> {
    let spawn_error = |reason: String| HandlerExecutionError::Spawn {
        interpreter: opts.interpreter.clone(),
        reason,
    };

    let handler = handler
        .canonicalize()
        .map_err(|e| spawn_error(format!("{}: {}", handler.display(), e)))?;
    let scratch = tempfile::Builder::new()
        .prefix("plugin-gate-smoke-")
        .tempdir()
        .map_err(|e| spawn_error(format!("scratch directory: {}", e)))?;
    let payload = serde_json::to_vec(event).map_err(|e| spawn_error(e.to_string()))?;

    let start = Instant::now();
    let mut child = Command::new(&opts.interpreter)
        .arg(&handler)
        .current_dir(scratch.path())
        .env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("HOME", scratch.path())
        .env("TMPDIR", scratch.path())
        .env("LANG", "C")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(e.to_string()))?;

    let stdin = child.stdin.take();
    thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            // A handler that ignores stdin closes the pipe early; that is fine.
            let _ = stdin.write_all(&payload);
        }
    });
    let stdout = capture(child.stdout.take(), opts.max_output_bytes);
    let stderr = capture(child.stderr.take(), opts.max_output_bytes);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                return Err(spawn_error(e.to_string()));
            }
        }
        if start.elapsed() > opts.timeout {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(handler = %handler.display(), "handler timed out");
            return Err(HandlerExecutionError::Timeout {
                seconds: opts.timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = start.elapsed();

    let deadline = start + opts.timeout;
    let (Some((out, out_truncated)), Some((err, _))) =
        (collect(&stdout, deadline), collect(&stderr, deadline))
    else {
        tracing::warn!(handler = %handler.display(), "handler output still open at deadline");
        return Err(HandlerExecutionError::Timeout {
            seconds: opts.timeout.as_secs(),
        });
    };
    let stdout = String::from_utf8_lossy(&out).into_owned();
    let stderr = String::from_utf8_lossy(&err).into_owned();
    tracing::debug!(?elapsed, status = %describe_status(&status), "handler finished");

    if !status.success() {
        return Err(HandlerExecutionError::Failed {
            status: describe_status(&status),
            stderr: output::compact_line(&stderr, 200),
        });
    }
    if out_truncated {
        return Err(HandlerExecutionError::InvalidOutput {
            reason: format!("stdout exceeded {} bytes", opts.max_output_bytes),
            stdout: output::compact_line(&stdout, 120),
        });
    }
    Ok(HandlerRun {
        stdout,
        stderr,
        elapsed,
    })
}

/// Decode handler stdout. Empty output means "no proposals".
pub fn parse_handler_output(stdout: &str) -> Result<Value, HandlerExecutionError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    serde_json::from_str(trimmed).map_err(|e| HandlerExecutionError::InvalidOutput {
        reason: e.to_string(),
        stdout: output::compact_line(trimmed, 120),
    })
}

/// Check handler output against the proposal contract. `null` is treated as an
/// empty list; every defect is reported.
pub fn check_proposals(output: &Value, contract: &Contract) -> Vec<ProposalContractError> {
    let items = match output {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        other => {
            return vec![ProposalContractError::NotASequence {
                found: output::json_type_name(other).to_string(),
            }];
        }
    };

    let mut errors = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            errors.push(ProposalContractError::NotAMapping {
                index,
                value: output::compact_line(&item.to_string(), 80),
            });
            continue;
        };

        let action = obj.get("action").and_then(Value::as_str);
        match action {
            None => errors.push(ProposalContractError::MissingAction { index }),
            Some(name) if !contract.has_action(name) => {
                errors.push(ProposalContractError::UnknownAction {
                    index,
                    action: name.to_string(),
                    allowed: contract.action_names(),
                });
            }
            Some(_) => {}
        }

        let action = action.unwrap_or("?").to_string();
        match obj.get("payload") {
            None => errors.push(ProposalContractError::MissingPayload { index, action }),
            Some(Value::Object(_)) => {}
            Some(other) => errors.push(ProposalContractError::PayloadNotMapping {
                index,
                action,
                found: output::json_type_name(other).to_string(),
            }),
        }
    }
    errors
}

/// Full smoke test: run, decode, check. Returns every failure found.
pub fn smoke_test(
    handler: &Path,
    handles_event: &str,
    contract: &Contract,
    opts: &SmokeTestOptions,
) -> Vec<PluginGateError> {
    let event = synthetic_event(handles_event);
    let run = match run_handler(handler, &event, opts) {
        Ok(run) => run,
        Err(e) => return vec![e.into()],
    };
    if !run.stderr.trim().is_empty() {
        tracing::debug!(stderr = %output::compact_line(&run.stderr, 200), "handler stderr");
    }
    let value = match parse_handler_output(&run.stdout) {
        Ok(value) => value,
        Err(e) => return vec![e.into()],
    };
    check_proposals(&value, contract)
        .into_iter()
        .map(PluginGateError::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{ActionDefinition, LifecycleEvent};
    use std::path::PathBuf;

    fn contract() -> Contract {
        Contract {
            contract_version: "1.0.0".to_string(),
            source: PathBuf::from("contract.md"),
            lifecycle_events: vec![LifecycleEvent {
                name: "FileDetected".to_string(),
                description: String::new(),
            }],
            allowed_actions: ["propose_move", "propose_quarantine"]
                .into_iter()
                .map(|name| ActionDefinition {
                    name: name.to_string(),
                    metadata: json!({}),
                })
                .collect(),
        }
    }

    #[test]
    fn synthetic_event_shape() {
        let event = synthetic_event("FileDetected");
        assert_eq!(event["name"], "FileDetected");
        let inputs = event["inputs"].as_object().unwrap();
        for key in ["path", "size", "sha256", "mime"] {
            assert!(inputs.contains_key(key), "{key}");
        }
        assert_eq!(event["inputs"]["sha256"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn empty_and_null_output_mean_no_proposals() {
        assert_eq!(parse_handler_output("  \n").unwrap(), json!([]));
        let null = parse_handler_output("null").unwrap();
        assert!(check_proposals(&null, &contract()).is_empty());
    }

    #[test]
    fn garbage_output_is_execution_error() {
        let err = parse_handler_output("not json").unwrap_err();
        assert!(matches!(err, HandlerExecutionError::InvalidOutput { .. }));
    }

    #[test]
    fn valid_proposals_pass() {
        let output = json!([
            {"action": "propose_move", "payload": {"to": "archive/"}},
            {"action": "propose_quarantine", "payload": {}}
        ]);
        assert!(check_proposals(&output, &contract()).is_empty());
    }

    #[test]
    fn each_defect_is_reported_separately() {
        let output = json!([
            "not-a-dict",
            {"payload": {}},
            {"action": "propose_delete", "payload": {}},
            {"action": "propose_move"},
            {"action": "propose_move", "payload": ["x"]}
        ]);
        let errors = check_proposals(&output, &contract());
        assert_eq!(errors.len(), 5);
        assert!(matches!(errors[0], ProposalContractError::NotAMapping { index: 0, .. }));
        assert_eq!(errors[1], ProposalContractError::MissingAction { index: 1 });
        assert!(matches!(
            &errors[2],
            ProposalContractError::UnknownAction { index: 2, action, .. } if action == "propose_delete"
        ));
        assert!(matches!(errors[3], ProposalContractError::MissingPayload { index: 3, .. }));
        assert!(matches!(
            &errors[4],
            ProposalContractError::PayloadNotMapping { index: 4, found, .. } if found == "array"
        ));
    }

    #[test]
    fn non_list_output_is_rejected() {
        let errors = check_proposals(&json!({"action": "propose_move"}), &contract());
        assert_eq!(
            errors,
            vec![ProposalContractError::NotASequence {
                found: "object".to_string()
            }]
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;

        fn write_handler(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("handler.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            path
        }

        fn opts(timeout_secs: u64) -> SmokeTestOptions {
            SmokeTestOptions {
                timeout: Duration::from_secs(timeout_secs),
                ..SmokeTestOptions::default()
            }
        }

        #[test]
        fn handler_sees_event_on_stdin() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(
                dir.path(),
                "EVENT=\"$(cat)\"\ncase \"$EVENT\" in *FileDetected*) printf '[{\"action\":\"propose_move\",\"payload\":{}}]' ;; *) printf '[]' ;; esac",
            );
            let run = run_handler(&handler, &synthetic_event("FileDetected"), &opts(10)).unwrap();
            let value = parse_handler_output(&run.stdout).unwrap();
            assert_eq!(value[0]["action"], "propose_move");
        }

        #[test]
        fn handler_runs_with_scrubbed_environment() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(
                dir.path(),
                "printf '[{\"action\":\"propose_move\",\"payload\":{\"home\":\"%s\",\"user\":\"%s\"}}]' \"$HOME\" \"${USER:-unset}\"",
            );
            let run = run_handler(&handler, &synthetic_event("FileDetected"), &opts(10)).unwrap();
            let value = parse_handler_output(&run.stdout).unwrap();
            let home = value[0]["payload"]["home"].as_str().unwrap();
            assert!(home.contains("plugin-gate-smoke-"), "home was {home}");
            assert_eq!(value[0]["payload"]["user"], "unset");
        }

        #[test]
        fn non_zero_exit_is_execution_error() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(dir.path(), "echo boom >&2\nexit 3");
            let err = run_handler(&handler, &synthetic_event("FileDetected"), &opts(10)).unwrap_err();
            assert_eq!(
                err,
                HandlerExecutionError::Failed {
                    status: "exit code 3".to_string(),
                    stderr: "boom".to_string(),
                }
            );
        }

        #[test]
        fn slow_handler_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(dir.path(), "sleep 5\nprintf '[]'");
            let started = Instant::now();
            let err = run_handler(&handler, &synthetic_event("FileDetected"), &opts(1)).unwrap_err();
            assert_eq!(err, HandlerExecutionError::Timeout { seconds: 1 });
            assert_eq!(err.kind(), "HandlerTimeoutError");
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[test]
        fn background_job_holding_output_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(dir.path(), "sleep 8 &\nprintf '[]\\n'");
            let started = Instant::now();
            let err = run_handler(&handler, &synthetic_event("FileDetected"), &opts(1)).unwrap_err();
            assert_eq!(err, HandlerExecutionError::Timeout { seconds: 1 });
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn oversized_output_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(
                dir.path(),
                "i=0\nwhile [ $i -lt 100 ]; do printf '0123456789'; i=$((i + 1)); done",
            );
            let small = SmokeTestOptions {
                max_output_bytes: 64,
                ..opts(10)
            };
            let err = run_handler(&handler, &synthetic_event("FileDetected"), &small).unwrap_err();
            match err {
                HandlerExecutionError::InvalidOutput { reason, stdout } => {
                    assert_eq!(reason, "stdout exceeded 64 bytes");
                    assert!(stdout.starts_with("0123456789"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn missing_interpreter_is_spawn_error() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(dir.path(), "printf '[]'");
            let bad = SmokeTestOptions {
                interpreter: "definitely-not-an-interpreter".to_string(),
                ..SmokeTestOptions::default()
            };
            let err = run_handler(&handler, &synthetic_event("FileDetected"), &bad).unwrap_err();
            assert!(matches!(err, HandlerExecutionError::Spawn { .. }));
        }

        #[test]
        fn smoke_test_reports_unknown_action() {
            let dir = tempfile::tempdir().unwrap();
            let handler = write_handler(
                dir.path(),
                "cat >/dev/null\nprintf '[{\"action\":\"propose_delete\",\"payload\":{}}]'",
            );
            let failures = smoke_test(&handler, "FileDetected", &contract(), &opts(10));
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].kind(), "ProposalContractError");
            assert!(failures[0].to_string().contains("propose_delete"));
        }
    }
}
