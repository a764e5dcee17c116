//! katapipe-engine — the analysis engine as a child process.
//!
//! The engine speaks newline-delimited JSON on its standard streams: queries
//! in on stdin, responses out on stdout, logs on stderr (inherited). The
//! same transport covers a real engine binary and a `nc` socket peer.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

pub type EngineLines = Lines<BufReader<ChildStdout>>;

/// Handle on the engine process itself; writing and reading halves are
/// split off at spawn time so each pipeline worker owns exactly one stream.
pub struct Engine {
    child: Child,
}

pub struct EngineWriter {
    stdin: ChildStdin,
}

/// Spawns the engine with piped stdin/stdout and inherited stderr.
pub fn spawn(command: &[String]) -> Result<(Engine, EngineWriter, EngineLines)> {
    let (program, args) = command.split_first().context("empty engine command")?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn engine: {program}"))?;
    let stdin = child
        .stdin
        .take()
        .context("engine stdin is not piped")?;
    let stdout = child
        .stdout
        .take()
        .context("engine stdout is not piped")?;
    Ok((
        Engine { child },
        EngineWriter { stdin },
        BufReader::new(stdout).lines(),
    ))
}

impl Engine {
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    pub async fn wait(&mut self) {
        let _ = self.child.wait().await;
    }
}

impl EngineWriter {
    /// One query per line, flushed immediately so the engine can start on
    /// it while we keep reading input.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        debug!("(to engine): {line}");
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stdin.shutdown().await
    }
}

pub fn terminate_all_line(id: &str) -> String {
    json!({"id": id, "action": "terminate_all"}).to_string()
}

/// Opens a one-shot connection solely to deliver a `terminate_all`. Used
/// against a socket peer whose real connection is already gone.
pub async fn broadcast_terminate_all(command: &[String], id: &str) -> Result<()> {
    let (mut engine, mut writer, _lines) = spawn(command)?;
    writer.send_line(&terminate_all_line(id)).await?;
    writer.shutdown().await?;
    // Give the peer a moment to take delivery before the process goes away.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), engine.wait()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_through_cat() {
        let command = vec!["cat".to_string()];
        let (mut engine, mut writer, mut lines) = spawn(&command).unwrap();

        writer.send_line(r#"{"id":"x","turnNumber":0}"#).await.unwrap();
        let echoed = lines.next_line().await.unwrap();
        assert_eq!(echoed.as_deref(), Some(r#"{"id":"x","turnNumber":0}"#));

        writer.shutdown().await.unwrap();
        engine.kill().await;
    }

    #[tokio::test]
    async fn eof_after_engine_exit() {
        let command = vec!["true".to_string()];
        let (_engine, _writer, mut lines) = spawn(&command).unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[test]
    fn spawn_rejects_empty_command() {
        assert!(spawn(&[]).is_err());
    }

    #[test]
    fn terminate_all_is_a_broadcast_action() {
        let line = terminate_all_line("abc_0");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["action"], "terminate_all");
        assert_eq!(value["id"], "abc_0");
    }
}
