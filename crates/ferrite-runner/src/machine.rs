//! Machine executor: steps run as shell commands inside a leased working
//! directory on the host.

use async_trait::async_trait;
use ferrite_core::events::OutputStream;
use ferrite_core::ports::{Environment, ExecOutcome, ExecRequest, OutputLine};
use ferrite_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

pub struct MachineEnvironment {
    workdir: PathBuf,
}

impl MachineEnvironment {
    /// Lease a fresh working directory under `data_dir`.
    pub async fn provision(data_dir: &Path) -> Result<Self> {
        let workdir = data_dir.join(format!("run-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to lease workdir: {}", e)))?;
        info!(workdir = %workdir.display(), "provisioned machine environment");
        Ok(Self { workdir })
    }
}

fn stream_lines(
    reader: impl AsyncRead + Unpin + Send + 'static,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_number = 0u32;
        while let Ok(Some(content)) = lines.next_line().await {
            line_number += 1;
            let line = OutputLine {
                stream,
                content,
                line_number,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(line).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl Environment for MachineEnvironment {
    async fn exec(
        &self,
        request: &ExecRequest,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<ExecOutcome> {
        let start = std::time::Instant::now();

        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(request.env.clone());

        debug!(command = %request.command, workdir = %self.workdir.display(), "executing");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&self.workdir)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
        let stdout_task = stream_lines(stdout, OutputStream::Stdout, line_tx.clone());
        let stderr_task = stream_lines(stderr, OutputStream::Stderr, line_tx);

        let hard_deadline = request.timeout.map(|t| Instant::now() + t);
        let mut quiet_deadline = Instant::now() + request.no_output_timeout;

        // Pump lines until both streams close, watching both deadlines.
        loop {
            tokio::select! {
                maybe_line = line_rx.recv() => match maybe_line {
                    Some(line) => {
                        quiet_deadline = Instant::now() + request.no_output_timeout;
                        if output_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(quiet_deadline) => {
                    warn!(command = %request.command, "no output within quiet period, killing");
                    let _ = child.kill().await;
                    return Ok(ExecOutcome::Stalled {
                        seconds: request.no_output_timeout.as_secs(),
                    });
                }
                _ = maybe_sleep(hard_deadline) => {
                    warn!(command = %request.command, "wall-clock limit exceeded, killing");
                    let _ = child.kill().await;
                    return Ok(ExecOutcome::TimedOut {
                        seconds: request.timeout.unwrap_or_default().as_secs(),
                    });
                }
            }
        }

        // Closed streams are not proof of exit: a process can close its
        // stdio and keep running, so the deadlines also bound the wait.
        let status = tokio::select! {
            waited = child.wait() => waited
                .map_err(|e| Error::Internal(format!("failed to wait for process: {}", e)))?,
            _ = sleep_until(quiet_deadline) => {
                warn!(command = %request.command, "no output within quiet period, killing");
                let _ = child.kill().await;
                return Ok(ExecOutcome::Stalled {
                    seconds: request.no_output_timeout.as_secs(),
                });
            }
            _ = maybe_sleep(hard_deadline) => {
                warn!(command = %request.command, "wall-clock limit exceeded, killing");
                let _ = child.kill().await;
                return Ok(ExecOutcome::TimedOut {
                    seconds: request.timeout.unwrap_or_default().as_secs(),
                });
            }
        };

        drop(line_rx);
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "command completed");

        Ok(ExecOutcome::Exited { exit_code, duration_ms })
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn destroy(&self) -> Result<()> {
        if self.workdir.exists() {
            tokio::fs::remove_dir_all(&self.workdir).await?;
        }
        info!(workdir = %self.workdir.display(), "destroyed machine environment");
        Ok(())
    }
}

pub(crate) async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(command: &str) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            env: HashMap::new(),
            timeout: None,
            no_output_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_exec_success_streams_output() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = env.exec(&request("echo hello"), tx).await.unwrap();
        assert!(outcome.success());

        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "hello");
        assert_eq!(line.stream, OutputStream::Stdout);

        env.destroy().await.unwrap();
        assert!(!env.workdir().exists());
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);

        let outcome = env.exec(&request("exit 3"), tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Exited { exit_code: 3, .. }));
        assert!(!outcome.success());
        env.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_wall_clock_timeout() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);

        let mut req = request("sleep 10");
        req.timeout = Some(Duration::from_millis(200));
        let outcome = env.exec(&req, tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));
        env.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_wall_clock_timeout_after_streams_close() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);

        // The shell closes its stdio up front and keeps running; the
        // wall-clock limit must still fire.
        let mut req = request("exec >/dev/null 2>&1; sleep 10");
        req.timeout = Some(Duration::from_millis(200));
        let outcome = env.exec(&req, tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));
        env.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_quiet_period_after_streams_close() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);

        let mut req = request("exec >/dev/null 2>&1; sleep 10");
        req.no_output_timeout = Duration::from_millis(300);
        let outcome = env.exec(&req, tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Stalled { .. }));
        env.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_quiet_period_stall() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);

        let mut req = request("echo first; sleep 10");
        req.no_output_timeout = Duration::from_millis(300);
        let outcome = env.exec(&req, tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Stalled { .. }));

        // Output produced before the stall is still delivered.
        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "first");
        env.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_steps_share_the_workdir() {
        let data = tempfile::tempdir().unwrap();
        let env = MachineEnvironment::provision(data.path()).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);

        env.exec(&request("echo state > marker.txt"), tx).await.unwrap();
        let outcome = env.exec(&request("cat marker.txt"), tx2).await.unwrap();
        assert!(outcome.success());
        assert_eq!(rx2.recv().await.unwrap().content, "state");
        env.destroy().await.unwrap();
    }
}
