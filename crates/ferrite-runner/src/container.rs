//! Container executor: each step runs in a fresh Docker container with
//! the job's working directory bind-mounted at `/workspace`.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use ferrite_core::events::OutputStream;
use ferrite_core::ports::{Environment, ExecOutcome, ExecRequest, OutputLine};
use ferrite_core::{Error, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::ResourceLimits;

pub struct ContainerEnvironment {
    docker: Docker,
    image: String,
    limits: ResourceLimits,
    workdir: PathBuf,
    /// Name of the container currently executing a step, if any; destroy
    /// force-removes it so cancellation cannot leak a running container.
    active: Mutex<Option<String>>,
}

impl ContainerEnvironment {
    pub async fn provision(
        docker: Docker,
        image: &str,
        limits: ResourceLimits,
        data_dir: &Path,
    ) -> Result<Self> {
        let workdir = data_dir.join(format!("run-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to lease workdir: {}", e)))?;
        info!(image, workdir = %workdir.display(), "provisioned container environment");
        Ok(Self {
            docker,
            image: image.to_string(),
            limits,
            workdir,
            active: Mutex::new(None),
        })
    }

    async fn remove(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(options)).await {
            warn!(container = name, error = %e, "failed to remove container");
        }
        self.active.lock().await.take();
    }
}

#[async_trait]
impl Environment for ContainerEnvironment {
    async fn exec(
        &self,
        request: &ExecRequest,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<ExecOutcome> {
        let start = std::time::Instant::now();
        let name = format!("ferrite-{}", uuid::Uuid::new_v4());

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                request.command.clone(),
            ]),
            env: Some(env),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:/workspace", self.workdir.display())]),
                memory: Some((self.limits.memory_mb * 1024 * 1024) as i64),
                nano_cpus: Some((self.limits.cpus * 1_000_000_000.0) as i64),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: &name,
            platform: None,
        };
        self.docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to create container: {}", e)))?;
        *self.active.lock().await = Some(name.clone());

        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to start container: {}", e)))?;

        debug!(container = %name, command = %request.command, "executing");

        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut log_stream = self.docker.logs(&name, Some(log_options));

        let hard_deadline = request.timeout.map(|t| Instant::now() + t);
        let mut quiet_deadline = Instant::now() + request.no_output_timeout;
        let mut stdout_lines = 0u32;
        let mut stderr_lines = 0u32;

        loop {
            tokio::select! {
                item = log_stream.next() => match item {
                    Some(Ok(output)) => {
                        let line = match output {
                            LogOutput::StdOut { message } => {
                                stdout_lines += 1;
                                OutputLine {
                                    stream: OutputStream::Stdout,
                                    content: String::from_utf8_lossy(&message).trim_end().to_string(),
                                    line_number: stdout_lines,
                                    timestamp: chrono::Utc::now(),
                                }
                            }
                            LogOutput::StdErr { message } => {
                                stderr_lines += 1;
                                OutputLine {
                                    stream: OutputStream::Stderr,
                                    content: String::from_utf8_lossy(&message).trim_end().to_string(),
                                    line_number: stderr_lines,
                                    timestamp: chrono::Utc::now(),
                                }
                            }
                            _ => continue,
                        };
                        quiet_deadline = Instant::now() + request.no_output_timeout;
                        if output_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(container = %name, error = %e, "error reading container logs");
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(quiet_deadline) => {
                    warn!(container = %name, "no output within quiet period, removing");
                    self.remove(&name).await;
                    return Ok(ExecOutcome::Stalled {
                        seconds: request.no_output_timeout.as_secs(),
                    });
                }
                _ = crate::machine::maybe_sleep(hard_deadline) => {
                    warn!(container = %name, "wall-clock limit exceeded, removing");
                    self.remove(&name).await;
                    return Ok(ExecOutcome::TimedOut {
                        seconds: request.timeout.unwrap_or_default().as_secs(),
                    });
                }
            }
        }

        // Logs closing is not proof of exit; the wall-clock limit still
        // bounds the wait, with a 60s ceiling against a wedged daemon.
        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let wait_limit = hard_deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(std::time::Duration::from_secs(60))
            .min(std::time::Duration::from_secs(60));
        let waited = timeout(
            wait_limit,
            self.docker.wait_container(&name, Some(wait_options)).next(),
        )
        .await;
        let exit_code = match waited {
            Ok(Some(Ok(body))) => body.status_code as i32,
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                code as i32
            }
            Ok(Some(Err(e))) => {
                self.remove(&name).await;
                return Err(Error::Internal(format!("container wait failed: {}", e)));
            }
            Err(_) if hard_deadline.is_some_and(|at| Instant::now() >= at) => {
                warn!(container = %name, "wall-clock limit exceeded, removing");
                self.remove(&name).await;
                return Ok(ExecOutcome::TimedOut {
                    seconds: request.timeout.unwrap_or_default().as_secs(),
                });
            }
            Ok(None) | Err(_) => {
                self.remove(&name).await;
                return Err(Error::Internal("container wait returned no result".to_string()));
            }
        };

        self.remove(&name).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(container = %name, exit_code, duration_ms, "container step completed");

        Ok(ExecOutcome::Exited { exit_code, duration_ms })
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(name) = self.active.lock().await.take() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = self.docker.remove_container(&name, Some(options)).await {
                warn!(container = %name, error = %e, "failed to remove container during teardown");
            }
        }
        if self.workdir.exists() {
            tokio::fs::remove_dir_all(&self.workdir).await?;
        }
        info!(workdir = %self.workdir.display(), "destroyed container environment");
        Ok(())
    }
}
