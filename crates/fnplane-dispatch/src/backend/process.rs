// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process sandbox.
//!
//! Runs code through a local interpreter, one child process per call:
//!
//! 1. the code is written to a temporary file,
//! 2. the interpreter is started on it with the input JSON on stdin,
//! 3. the last non-empty stdout line is parsed as the JSON result, every
//!    other stdout line plus stderr becomes logs.
//!
//! A non-zero exit is a failed outcome. The child is killed when the
//! deadline passes or the cancellation token fires.
//!
//! This gives process isolation only. It is meant for local development
//! and the CLI, not for untrusted code.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::*;

/// Environment variable carrying the entry point to the guest.
pub const ENTRY_POINT_ENV: &str = "FNPLANE_ENTRY_POINT";

/// How to start code of one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    /// Program to run.
    pub program: String,
    /// Arguments placed before the code file.
    pub args: Vec<String>,
    /// Extension of the temporary code file.
    pub extension: String,
}

impl Interpreter {
    /// Interpreter taking the code file as its only argument.
    pub fn new(program: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extension: extension.into(),
        }
    }
}

/// Sandbox running code in local interpreter processes.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreters: HashMap<String, Interpreter>,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSandbox {
    /// Sandbox with the default interpreters:
    /// `javascript` -> `node`, `python` -> `python3`, `shell` -> `sh`.
    pub fn new() -> Self {
        let mut interpreters = HashMap::new();
        interpreters.insert("javascript".to_string(), Interpreter::new("node", "js"));
        interpreters.insert("python".to_string(), Interpreter::new("python3", "py"));
        interpreters.insert("shell".to_string(), Interpreter::new("sh", "sh"));
        Self { interpreters }
    }

    /// Register or replace the interpreter for a language.
    pub fn with_interpreter(mut self, language: impl Into<String>, interpreter: Interpreter) -> Self {
        self.interpreters.insert(language.into(), interpreter);
        self
    }

    /// Languages this sandbox can run.
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.interpreters.keys().map(String::as_str).collect();
        languages.sort();
        languages
    }
}

/// Split stdout into the result line and log lines.
fn parse_output(stdout: &str) -> (Option<&str>, Vec<String>) {
    let lines: Vec<&str> = stdout.lines().collect();
    let Some(last) = lines.iter().rposition(|l| !l.trim().is_empty()) else {
        return (None, Vec::new());
    };

    let logs = lines[..last]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect();
    (Some(lines[last].trim()), logs)
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn sandbox_type(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome> {
        let Some(interpreter) = self.interpreters.get(&request.language) else {
            return Ok(SandboxOutcome::failed(format!(
                "Unsupported language: {}",
                request.language
            )));
        };

        let start = Instant::now();

        let code_file = tempfile::Builder::new()
            .prefix("fnplane-")
            .suffix(&format!(".{}", interpreter.extension))
            .tempfile()?;
        tokio::fs::write(code_file.path(), &request.code).await?;

        let mut cmd = Command::new(&interpreter.program);
        cmd.args(&interpreter.args)
            .arg(code_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(entry_point) = &request.entry_point {
            cmd.env(ENTRY_POINT_ENV, entry_point);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::Unavailable(format!(
                    "Interpreter '{}' not found",
                    interpreter.program
                )));
            }
            Err(e) => return Err(BackendError::Io(e)),
        };

        debug!(
            language = %request.language,
            program = %interpreter.program,
            pid = ?child.id(),
            "Started sandbox process"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let mut input = serde_json::to_vec(&request.input)
                .map_err(|e| BackendError::Other(format!("Failed to encode input: {}", e)))?;
            input.push(b'\n');
            // A guest that never reads stdin closes the pipe early.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "Sandbox process did not read its input");
            }
        }

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = tokio::time::sleep(request.timeout) => {
                warn!(language = %request.language, "Sandbox process timed out, killing it");
                return Ok(SandboxOutcome::failed(format!(
                    "Execution timed out after {}ms",
                    request.timeout.as_millis()
                )));
            }
            _ = request.cancel.cancelled() => {
                warn!(language = %request.language, "Sandbox process cancelled, killing it");
                return Err(BackendError::Cancelled);
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let (result_line, mut logs) = parse_output(&stdout);
        logs.extend(
            stderr
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );

        let mut outcome = if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let message = stderr.trim();
            SandboxOutcome::failed(if message.is_empty() {
                format!("Process exited with code {}", code)
            } else {
                message.to_string()
            })
        } else {
            match result_line.map(serde_json::from_str::<Value>) {
                Some(Ok(value)) => SandboxOutcome::ok(value),
                Some(Err(e)) => SandboxOutcome::failed(format!("Function output is not valid JSON: {}", e)),
                None => SandboxOutcome::failed("Function produced no output"),
            }
        };
        outcome.logs = logs;
        outcome.cpu_time_ms = elapsed_ms;

        Ok(outcome)
    }
}
