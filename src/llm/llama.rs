//! llama.cpp command-line generator.
//!
//! Runs `<llama> -m <model> -n <tokens> --temp <t> <prompt>` with:
//! - stdin closed, stderr discarded (llama logs there)
//! - stdout captured incrementally so a timeout keeps what was produced
//! - the child killed on timeout or drop

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{RawCompletion, TextGenerator};

/// Maximum captured output (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 0.5;

/// llama.cpp invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct LlamaCli {
    binary: PathBuf,
    model: PathBuf,
    temperature: f32,
}

impl LlamaCli {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn command(&self, prompt: &str, max_tokens: u32) -> Command {
        let mut command = Command::new(&self.binary);
        // This llama build takes the prompt as a positional argument.
        command
            .arg("-m")
            .arg(&self.model)
            .arg("-n")
            .arg(max_tokens.to_string())
            .arg("--temp")
            .arg(self.temperature.to_string())
            .arg(prompt);
        command
    }
}

#[async_trait]
impl TextGenerator for LlamaCli {
    fn name(&self) -> &str {
        "llama"
    }

    fn is_available(&self) -> bool {
        self.binary.exists() && self.model.exists()
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<RawCompletion, LlmError> {
        capture_with_timeout(self.command(prompt, max_tokens), timeout).await
    }
}

/// Run `command`, capturing stdout until it exits or `timeout` elapses.
///
/// A timeout is not an error: the result carries `timed_out` and whatever
/// stdout had been read by then.
pub async fn capture_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<RawCompletion, LlmError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().to_string();
    let mut child = command.spawn().map_err(|e| LlmError::SpawnFailed {
        binary: program.clone(),
        reason: e.to_string(),
    })?;

    let mut stdout = child.stdout.take().ok_or_else(|| LlmError::SpawnFailed {
        binary: program.clone(),
        reason: "stdout was not captured".into(),
    })?;

    // Filled chunk by chunk so a cancelled read loses nothing already read.
    let mut captured: Vec<u8> = Vec::new();

    let result = tokio::time::timeout(timeout, async {
        let mut chunk = [0u8; 4096];
        loop {
            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let room = MAX_OUTPUT_SIZE.saturating_sub(captured.len());
            captured.extend_from_slice(&chunk[..n.min(room)]);
        }
        child.wait().await
    })
    .await;

    match result {
        Ok(Ok(status)) => {
            debug!(
                binary = %program,
                exit_code = status.code().unwrap_or(-1),
                bytes = captured.len(),
                "Generator finished"
            );
            Ok(RawCompletion::completed(String::from_utf8_lossy(&captured)))
        }
        Ok(Err(e)) => Err(LlmError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            warn!(
                binary = %program,
                timeout_secs = timeout.as_secs(),
                salvaged_bytes = captured.len(),
                "Generator timed out, salvaging partial output"
            );
            Ok(RawCompletion::timed_out(String::from_utf8_lossy(&captured)))
        }
    }
}
