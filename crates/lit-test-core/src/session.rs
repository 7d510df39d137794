//! Runtime sessions: a persistent worker subprocess driven over a
//! line-delimited JSON protocol on stdin/stdout.
//!
//! Each request is one JSON object on one line; each response is one
//! JSON value on one line. `init` and `vars` are acknowledged with the
//! string `"ack"`; `test` returns an object with the exit code, the
//! captured output, and optionally a condensed error rendering.

use crate::options::TestOptions;
use crate::spec::RuntimeLocator;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Worker script bundled into the binary and written out at start.
const PYTHON_WORKER: &str = include_str!("python_worker.py");

/// Errors from starting or talking to a runtime session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("error starting runtime: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime protocol error: {0}")]
    Protocol(String),
    #[error("runtime session is not running")]
    NotRunning,
}

/// Result of executing one test expression in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub code: i32,
    pub output: String,
    /// Condensed error rendering, present for error results.
    pub short_error: Option<String>,
}

impl TestResult {
    /// Sentinel result for a response the session could not decode.
    /// The scheduler treats it like any other failing result.
    #[must_use]
    pub fn protocol_failure(detail: &str) -> Self {
        Self {
            code: -1,
            output: format!("invalid response from runtime: {detail}"),
            short_error: None,
        }
    }

    /// Output candidates to match against, most detailed first.
    #[must_use]
    pub fn output_candidates(&self, error_detail: bool) -> Vec<&str> {
        match &self.short_error {
            Some(short) if !error_detail => vec![self.output.as_str(), short.as_str()],
            _ => vec![self.output.as_str()],
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Request<'a> {
    Init {
        expr: Option<&'a str>,
    },
    Vars {
        vars: &'a serde_json::Map<String, serde_json::Value>,
    },
    Test {
        expr: &'a str,
        filename: &'a str,
        line: usize,
        options: &'a TestOptions,
    },
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum WireResponse {
    Ack(String),
    Result(WireResult),
}

#[derive(Deserialize, Debug)]
struct WireResult {
    code: i32,
    output: String,
    #[serde(rename = "short-error")]
    short_error: Option<String>,
}

/// The request/response half of a session, generic over the transport
/// so the protocol is testable without a subprocess.
struct Wire<W, R> {
    writer: W,
    reader: R,
}

impl<W: AsyncWrite + Unpin, R: AsyncBufRead + Unpin> Wire<W, R> {
    async fn send(&mut self, request: &Request<'_>) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        line.push('\n');
        debug!("session request: {}", line.trim_end());
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Option<WireResponse>, SessionError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(SessionError::NotRunning);
        }
        debug!("session response: {}", line.trim_end());
        match serde_json::from_str(&line) {
            Ok(response) => Ok(Some(response)),
            Err(_) => Ok(None),
        }
    }

    async fn expect_ack(&mut self, what: &str) -> Result<(), SessionError> {
        match self.read_response().await? {
            Some(WireResponse::Ack(ack)) if ack == "ack" => Ok(()),
            other => Err(SessionError::Protocol(format!(
                "expected ack for {what}, got {other:?}"
            ))),
        }
    }

    async fn init(&mut self, expr: Option<&str>) -> Result<(), SessionError> {
        self.send(&Request::Init { expr }).await?;
        self.expect_ack("init").await
    }

    async fn vars(
        &mut self,
        vars: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionError> {
        self.send(&Request::Vars { vars }).await?;
        self.expect_ack("vars").await
    }

    async fn exec(
        &mut self,
        expr: &str,
        filename: &str,
        line: usize,
        options: &TestOptions,
    ) -> Result<TestResult, SessionError> {
        self.send(&Request::Test { expr, filename, line, options }).await?;
        match self.read_response().await? {
            Some(WireResponse::Result(result)) => Ok(TestResult {
                code: result.code,
                output: result.output,
                short_error: result.short_error,
            }),
            Some(WireResponse::Ack(other)) => {
                Ok(TestResult::protocol_failure(&format!("unexpected '{other}'")))
            }
            None => Ok(TestResult::protocol_failure("undecodable line")),
        }
    }
}

/// What a test scheduler needs from a runtime. Implemented by
/// [`RuntimeSession`] for real subprocesses and by fakes in tests.
#[allow(async_fn_in_trait)]
pub trait Runtime {
    /// Initialize runtime state, optionally evaluating an init script.
    async fn init(&mut self, expr: Option<&str>) -> Result<(), SessionError>;

    /// Execute one test expression and return its result.
    async fn exec_test(
        &mut self,
        expr: &str,
        filename: &str,
        line: usize,
        options: &TestOptions,
    ) -> Result<TestResult, SessionError>;

    /// Make bound match variables visible to subsequent tests.
    async fn update_vars(
        &mut self,
        vars: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionError>;

    /// Whether the runtime can accept requests.
    fn is_available(&self) -> bool;

    /// Shut the runtime down, waiting up to `timeout` for a clean exit.
    async fn stop(&mut self, timeout: Duration) -> Result<(), SessionError>;
}

/// A runtime session backed by a worker subprocess.
pub struct RuntimeSession {
    child: Child,
    wire: Wire<ChildStdin, BufReader<ChildStdout>>,
    // Keeps the deployed worker script alive for the process lifetime.
    _script: NamedTempFile,
}

impl RuntimeSession {
    /// Start a session for the given runtime.
    ///
    /// # Errors
    /// Returns an error if the worker script cannot be written or the
    /// interpreter cannot be spawned.
    pub fn start(runtime: RuntimeLocator) -> Result<Self, SessionError> {
        let RuntimeLocator::Python = runtime;
        let mut script = NamedTempFile::with_suffix(".py")?;
        script.write_all(PYTHON_WORKER.as_bytes())?;
        script.flush()?;
        let mut child = Command::new("python3")
            .arg(script.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SessionError::Spawn)?;
        let stdin = child.stdin.take().ok_or(SessionError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(SessionError::NotRunning)?;
        Ok(Self {
            child,
            wire: Wire { writer: stdin, reader: BufReader::new(stdout) },
            _script: script,
        })
    }
}

impl Runtime for RuntimeSession {
    async fn init(&mut self, expr: Option<&str>) -> Result<(), SessionError> {
        self.wire.init(expr).await
    }

    async fn exec_test(
        &mut self,
        expr: &str,
        filename: &str,
        line: usize,
        options: &TestOptions,
    ) -> Result<TestResult, SessionError> {
        self.wire.exec(expr, filename, line, options).await
    }

    async fn update_vars(
        &mut self,
        vars: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionError> {
        self.wire.vars(vars).await
    }

    fn is_available(&self) -> bool {
        // `id()` is `None` once the child has been reaped.
        self.child.id().is_some()
    }

    async fn stop(&mut self, timeout: Duration) -> Result<(), SessionError> {
        // An empty line tells the worker to exit.
        if self.wire.writer.write_all(b"\n").await.is_ok() {
            let _ = self.wire.writer.flush().await;
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                self.child.start_kill()?;
                self.child.wait().await?;
            }
        }
        Ok(())
    }
}
