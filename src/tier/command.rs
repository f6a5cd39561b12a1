// src/tier/command.rs — Process-backed tier adapter
//
// Runs a configured extractor program: document bytes on stdin, the media
// type in BILLWISE_MEDIA_TYPE, one `AdapterResponse` JSON object on stdout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AdapterResponse, TierAdapter, TierFailure, TierOutput};
use crate::core::types::Tier;

pub struct CommandAdapter {
    tier: Tier,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAdapter {
    pub fn new(tier: Tier, command: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            tier,
            command: command.to_string(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl TierAdapter for CommandAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn is_available(&self) -> Result<(), String> {
        // PATH lookup touches the filesystem; keep it off the runtime threads.
        let command = self.command.clone();
        tokio::task::spawn_blocking(move || which::which(&command))
            .await
            .map_err(|e| format!("lookup of '{}' failed: {e}", self.command))?
            .map(|_| ())
            .map_err(|e| format!("'{}' not found: {e}", self.command))
    }

    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<TierOutput, TierFailure> {
        let start = Instant::now();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("BILLWISE_MEDIA_TYPE", media_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    TierFailure::Unavailable(format!("'{}' not found", self.command))
                }
                _ => TierFailure::Rejected(format!("failed to start '{}': {e}", self.command)),
            })?;

        // Feed stdin from a separate task so a chatty child cannot block
        // on a full stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let payload = bytes.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!("Extractor closed stdin early: {}", e);
                }
            })
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                TierFailure::transient(format!(
                    "'{}' did not finish within {}s",
                    self.command,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| TierFailure::Rejected(format!("'{}' failed: {e}", self.command)))?;

        if let Some(writer) = writer {
            let _ = writer.await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TierFailure::Rejected(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(
            tier = %self.tier,
            command = %self.command,
            bytes = output.stdout.len(),
            "Extractor finished"
        );

        Ok(AdapterResponse::parse(&output.stdout)?.into_output(start.elapsed()))
    }
}
