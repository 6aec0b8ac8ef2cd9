//! Environment provisioning with bounded retry.

use bollard::Docker;
use ferrite_core::definition::ExecutorSpec;
use ferrite_core::ports::{Environment, ExecutorBackend};
use ferrite_core::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

use crate::container::ContainerEnvironment;
use crate::machine::MachineEnvironment;
use crate::{RunnerConfig, resource_limits};

/// Bounded retry with delay for provisioning attempts. Provisioning is
/// the one transient failure worth retrying; step failures never are.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (attempts count from 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = if self.exponential {
            1u64 << (attempt.saturating_sub(1).min(16))
        } else {
            1
        };
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }
}

/// Provision an environment, retrying transient failures per the policy.
/// Exhausting every attempt surfaces a provisioning error.
pub async fn provision_with_retry(
    backend: &dyn ExecutorBackend,
    spec: &ExecutorSpec,
    policy: &RetryPolicy,
) -> Result<Box<dyn Environment>> {
    let attempts = policy.max_attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay(attempt - 1)).await;
        }
        match backend.create(spec).await {
            Ok(env) => return Ok(env),
            Err(e) => {
                if attempt == attempts {
                    error!(attempt, error = %e, "provisioning failed after all attempts");
                } else {
                    warn!(attempt, error = %e, "provisioning failed, will retry");
                }
                last = Some(e);
            }
        }
    }
    Err(Error::Provisioning(
        last.map(|e| e.to_string())
            .unwrap_or_else(|| "no provisioning attempt made".to_string()),
    ))
}

/// Backend that provisions on the local host: Docker containers for image
/// executors, a leased directory plus host shell for machine executors.
pub struct LocalBackend {
    config: RunnerConfig,
}

impl LocalBackend {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecutorBackend for LocalBackend {
    async fn create(&self, spec: &ExecutorSpec) -> Result<Box<dyn Environment>> {
        let limits = resource_limits(&spec.resource_class).ok_or_else(|| {
            Error::Provisioning(format!("unknown resource class {:?}", spec.resource_class))
        })?;

        if let Some(image) = &spec.image {
            let docker = Docker::connect_with_local_defaults()
                .map_err(|e| Error::Provisioning(format!("failed to connect to Docker: {}", e)))?;
            let env =
                ContainerEnvironment::provision(docker, image, limits, &self.config.data_dir)
                    .await?;
            Ok(Box::new(env))
        } else {
            let env = MachineEnvironment::provision(&self.config.data_dir).await?;
            Ok(Box::new(env))
        }
    }
}
