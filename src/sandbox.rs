// Each call runs a fresh runtime process fed over stdin. The soft timeout is
// raced inside the runtime; the hard timeout kills the process from here.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::utils::clip;

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const MIN_TIMEOUT_MS: u64 = 100;
// Larger delays overflow the runtime's timer and fire immediately.
pub const MAX_TIMEOUT_MS: u64 = i32::MAX as u64;
pub const HARD_ABORT_MARGIN: Duration = Duration::from_millis(250);
pub const HARD_ABORT_FLOOR: Duration = Duration::from_millis(1500);

pub const SOFT_TIMEOUT_ERROR: &str = "Timeout exceeded";
pub const HARD_ABORT_ERROR: &str = "Worker aborted (hard timeout)";

// Reads `{code, timeoutMs}` on stdin, writes one `{ok, result?, error?, timedOut?, logs}` line.
pub const HARNESS: &str = r#"
const chunks = [];
process.on('unhandledRejection', () => {});
process.stdin.on('data', (c) => chunks.push(c));
process.stdin.on('end', async () => {
  const logs = [];
  const fmt = (x) => {
    if (typeof x === 'string') return x;
    try { const s = JSON.stringify(x); return s === undefined ? String(x) : s; } catch (_) { return String(x); }
  };
  for (const level of ['log', 'info', 'warn', 'error']) {
    console[level] = (...a) => { logs.push(a.map(fmt).join(' ')); };
  }
  const emit = (reply) => { process.stdout.write(JSON.stringify(reply) + '\n', () => process.exit(0)); };
  let req;
  try { req = JSON.parse(Buffer.concat(chunks).toString('utf8')); }
  catch (err) { emit({ ok: false, error: 'Bad sandbox request: ' + String(err), logs }); return; }
  let timer;
  const timeout = new Promise((_, rej) => {
    timer = setTimeout(() => rej(Object.assign(new Error('Timeout exceeded'), { sandboxTimeout: true })), req.timeoutMs);
  });
  try {
    const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;
    const exec = new AsyncFunction(req.code)();
    const result = await Promise.race([exec, timeout]);
    clearTimeout(timer);
    let value = null;
    if (result !== undefined) {
      try { value = JSON.parse(JSON.stringify(result)); } catch (_) { value = String(result); }
    }
    emit({ ok: true, result: value, logs });
  } catch (err) {
    clearTimeout(timer);
    emit({ ok: false, error: String(err), timedOut: !!(err && err.sandboxTimeout), logs });
  }
});
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    SoftTimedOut,
    HardAborted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub ok: bool,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<String>,
    #[serde(rename = "timeMs")]
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    fn failed(status: ExecutionStatus, error: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: false,
            status,
            result: None,
            error: Some(error.into()),
            logs: Vec::new(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HarnessReply {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "timedOut")]
    timed_out: bool,
    #[serde(default)]
    logs: Vec<String>,
}

pub fn hard_timeout(soft: Duration) -> Duration {
    (soft + HARD_ABORT_MARGIN).max(HARD_ABORT_FLOOR)
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    program: String,
    args: Vec<String>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::node()
    }
}

static NODE_PERMISSION_FLAG: LazyLock<&'static str> =
    LazyLock::new(|| node_permission_flag(&node_version().unwrap_or_default()));

fn node_version() -> Option<String> {
    let out = Command::new("node").arg("--version").output().ok()?;
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Flag that turns on node's permission model: no file system, child
/// processes, workers or addons unless explicitly allowed.
/// Unknown versions get the current flag, so an old runtime refuses to start
/// instead of running unrestricted.
pub fn node_permission_flag(version: &str) -> &'static str {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(u32::MAX);
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    match (major, minor) {
        (20..=21, _) => "--experimental-permission",
        (22, m) if m < 13 => "--experimental-permission",
        (23, m) if m < 5 => "--experimental-permission",
        _ => "--permission",
    }
}

impl Sandbox {
    /// `program args... <HARNESS>`: the harness source is always the last argument.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn node() -> Self {
        Self::new(
            "node",
            vec![NODE_PERMISSION_FLAG.to_string(), "-e".to_string()],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub async fn execute(&self, code: &str, timeout_ms: u64) -> ExecutionReport {
        let sandbox = self.clone();
        let code = code.to_string();
        let started = Instant::now();
        match tokio::task::spawn_blocking(move || sandbox.execute_blocking(&code, timeout_ms)).await
        {
            Ok(report) => report,
            Err(join_err) => ExecutionReport::failed(
                ExecutionStatus::Failed,
                format!("Sandbox task failed: {}", join_err),
                started,
            ),
        }
    }

    pub fn execute_blocking(&self, code: &str, timeout_ms: u64) -> ExecutionReport {
        let soft_ms = timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        let hard = hard_timeout(Duration::from_millis(soft_ms));
        let started = Instant::now();
        debug!(program = %self.program, soft_ms, hard_ms = hard.as_millis() as u64, "starting sandbox");

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionReport::failed(
                    ExecutionStatus::Failed,
                    format!("Failed to start sandbox runtime '{}': {}", self.program, e),
                    started,
                );
            }
        };

        // Pipes are fed and drained off-thread so the watchdog never blocks.
        let request = json!({ "code": code, "timeoutMs": soft_ms }).to_string();
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                let _ = stdin.write_all(request.as_bytes());
            });
        }
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(hard) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // Hard timeout reached, kill the process. Whatever it wrote is discarded.
                let _ = child.kill();
                let _ = child.wait();
                warn!(program = %self.program, hard_ms = hard.as_millis() as u64, "sandbox hard abort");
                return ExecutionReport::failed(ExecutionStatus::HardAborted, HARD_ABORT_ERROR, started);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return ExecutionReport::failed(
                    ExecutionStatus::Failed,
                    format!("Wait error: {}", e),
                    started,
                );
            }
        };

        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match parse_reply(&stdout) {
            Some(reply) => report_from_reply(reply, elapsed_ms),
            None => ExecutionReport::failed(
                ExecutionStatus::Failed,
                no_reply_message(status, &stderr),
                started,
            ),
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(HARNESS)
            .current_dir(std::env::temp_dir())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.spawn()
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

// Last non-empty line; earlier stdout writes from user code are ignored.
fn parse_reply(stdout: &str) -> Option<HarnessReply> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

fn report_from_reply(reply: HarnessReply, elapsed_ms: u64) -> ExecutionReport {
    if reply.ok {
        return ExecutionReport {
            ok: true,
            status: ExecutionStatus::Completed,
            result: Some(reply.result.unwrap_or(Value::Null)),
            error: None,
            logs: reply.logs,
            elapsed_ms,
        };
    }
    let (status, error) = if reply.timed_out {
        (ExecutionStatus::SoftTimedOut, SOFT_TIMEOUT_ERROR.to_string())
    } else {
        (
            ExecutionStatus::Completed,
            reply.error.unwrap_or_else(|| "Unknown error".to_string()),
        )
    };
    ExecutionReport {
        ok: false,
        status,
        result: None,
        error: Some(error),
        logs: reply.logs,
        elapsed_ms,
    }
}

fn no_reply_message(status: ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("Sandbox runtime exited ({}) without a result", status)
    } else {
        format!(
            "Sandbox runtime exited ({}) without a result: {}",
            status,
            clip(stderr, 500)
        )
    }
}
