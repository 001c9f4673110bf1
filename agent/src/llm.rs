//! LLM calls through an external process.
//!
//! The configured program receives the prompt on stdin and answers on
//! stdout. The child is killed if the call times out or is dropped.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use relay_config::LlmConfig;
use relay_contracts::error::{RelayError, RelayResult};
use relay_core::traits::LlmCaller;

#[derive(Debug, Clone)]
pub struct ProcessLlmCaller {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessLlmCaller {
    pub fn new(argv: &[String], timeout: Duration, max_output_bytes: usize) -> RelayResult<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| RelayError::Config {
            reason: "llm command is empty".to_string(),
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            max_output_bytes,
        })
    }

    pub fn from_config(config: &LlmConfig) -> RelayResult<Self> {
        Self::new(&config.command, config.timeout(), config.max_output_bytes)
    }

    async fn run_child(&self, prompt: &str) -> RelayResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| llm_error(format!("cannot start '{}': {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| llm_error("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| llm_error("child stdout unavailable"))?;

        // Feed stdin while draining stdout so neither pipe can fill up.
        let input = prompt.as_bytes().to_vec();
        let write = async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        };
        let limit = self.max_output_bytes as u64 + 1;
        let read = async move {
            let mut buf = Vec::new();
            stdout.take(limit).read_to_end(&mut buf).await.map(|_| buf)
        };
        let (written, output) = tokio::join!(write, read);

        match written {
            Ok(()) => {}
            // The program may answer without reading all of its input.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!(program = %self.program, "llm closed stdin early");
            }
            Err(e) => return Err(llm_error(format!("cannot write prompt: {}", e))),
        }
        let output = output.map_err(|e| llm_error(format!("cannot read response: {}", e)))?;
        if output.len() > self.max_output_bytes {
            return Err(llm_error(format!(
                "response exceeds {} bytes",
                self.max_output_bytes
            )));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| llm_error(format!("cannot wait for '{}': {}", self.program, e)))?;
        if !status.success() {
            return Err(llm_error(format!("'{}' exited with {}", self.program, status)));
        }

        String::from_utf8(output).map_err(|_| RelayError::InvalidResponse {
            reason: "response is not valid UTF-8".to_string(),
        })
    }
}

#[async_trait]
impl LlmCaller for ProcessLlmCaller {
    async fn call(&self, prompt: &str) -> RelayResult<String> {
        debug!(program = %self.program, prompt_bytes = prompt.len(), "starting llm process");
        match tokio::time::timeout(self.timeout, self.run_child(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(program = %self.program, timeout_secs = self.timeout.as_secs(), "llm call timed out");
                Err(llm_error(format!(
                    "no response within {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

fn llm_error(reason: impl Into<String>) -> RelayError {
    RelayError::LlmCall {
        reason: reason.into(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
