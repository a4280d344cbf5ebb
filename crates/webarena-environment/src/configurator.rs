// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Post-launch configuration.
//!
//! A freshly started workload still believes it lives at the image's built-in
//! development address. The applier runs the template's recipe inside the
//! workload until the application stops redirecting to that address.
//!
//! Protocol per launch:
//!
//! 1. Wait `grace_period` so the entrypoint can start initializing.
//! 2. Run the whole recipe. Any non-zero exit (except tolerant steps) fails
//!    the attempt.
//! 3. Probe from inside the workload. If the response head still names the
//!    placeholder host, the attempt failed.
//! 4. On failure, wait `retry_delay` and start over, up to `max_attempts`.
//!
//! Attempts are strictly sequential. Final failure is reported to the caller
//! as [`ConfigurationError`], which the orchestrator logs and drops: a running
//! but unconfigured environment is still worth keeping.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::runner::{RuntimeError, WorkloadRuntime};
use crate::templates::{ConfigStep, EnvironmentTemplate};

/// Retry policy for post-launch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationPolicy {
    /// Delay between launch and the first attempt.
    pub grace_period: Duration,
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ConfigurationPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            max_attempts: 8,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Why a configuration attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// A recipe step exited non-zero.
    #[error("exec failed (rc={exit_code}): {command}\n--- output ---\n{output}\n--------------")]
    StepFailed {
        /// Rendered command.
        command: String,
        /// Exit code.
        exit_code: i64,
        /// Combined output.
        output: String,
    },

    /// The application still redirects to the placeholder host.
    #[error("still redirecting to {marker}")]
    StaleRedirect {
        /// Marker that was found.
        marker: String,
    },

    /// The exec session itself failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Every attempt failed.
    #[error("configuration abandoned after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: Box<ConfigurationError>,
    },
}

/// Runs template recipes inside workloads.
pub struct ConfigurationApplier {
    runtime: Arc<dyn WorkloadRuntime>,
    policy: ConfigurationPolicy,
}

impl ConfigurationApplier {
    /// Create an applier with the given policy.
    pub fn new(runtime: Arc<dyn WorkloadRuntime>, policy: ConfigurationPolicy) -> Self {
        Self { runtime, policy }
    }

    /// The active retry policy.
    pub fn policy(&self) -> ConfigurationPolicy {
        self.policy
    }

    /// Configure a freshly launched workload.
    ///
    /// Returns the number of attempts it took. Templates without a recipe
    /// return immediately with zero attempts.
    pub async fn apply(
        &self,
        workload_id: &str,
        template: &EnvironmentTemplate,
        base_url: &str,
    ) -> Result<u32, ConfigurationError> {
        if !template.needs_configuration() {
            debug!(environment_name = %template.name, "No post-launch recipe");
            return Ok(0);
        }

        tokio::time::sleep(self.policy.grace_period).await;

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            let recipe = self.run_recipe(workload_id, template, base_url).await;
            // Probed after a failed recipe too.
            let stale = self.redirect_is_stale(workload_id, template).await;

            let outcome = match (recipe, stale) {
                (Ok(()), Ok(false)) => Ok(()),
                (Ok(()), Ok(true)) => Err(ConfigurationError::StaleRedirect {
                    marker: template.stale_redirect_marker.clone().unwrap_or_default(),
                }),
                (Err(e), _) | (Ok(()), Err(e)) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    info!(
                        workload_id,
                        environment_name = %template.name,
                        attempt,
                        "Post-launch configuration applied"
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(
                        workload_id,
                        environment_name = %template.name,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Post-launch configuration attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(ConfigurationError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error: Box::new(last_error.unwrap_or(ConfigurationError::StaleRedirect {
                marker: String::new(),
            })),
        })
    }

    /// Run every step of the recipe once, stopping at the first hard failure.
    pub async fn run_recipe(
        &self,
        workload_id: &str,
        template: &EnvironmentTemplate,
        base_url: &str,
    ) -> Result<(), ConfigurationError> {
        for step in &template.recipe {
            if let ConfigStep::Pause(pause) = step {
                tokio::time::sleep(*pause).await;
                continue;
            }
            let Some(command) = step.render(base_url) else {
                continue;
            };

            let result = self.exec_shell(workload_id, &command).await?;
            if !result.success() {
                if step.tolerates_failure() {
                    debug!(workload_id, command = %command, exit_code = result.exit_code, "Tolerated step failure");
                    continue;
                }
                return Err(ConfigurationError::StepFailed {
                    command,
                    exit_code: result.exit_code,
                    output: result.output,
                });
            }
        }
        Ok(())
    }

    /// Whether the application inside the workload still points at the
    /// placeholder host.
    pub async fn redirect_is_stale(
        &self,
        workload_id: &str,
        template: &EnvironmentTemplate,
    ) -> Result<bool, ConfigurationError> {
        let Some(marker) = &template.stale_redirect_marker else {
            return Ok(false);
        };
        let command = template.readiness_command();
        let head = self.exec_shell(workload_id, &command).await?;
        if !head.success() {
            return Err(ConfigurationError::StepFailed {
                command,
                exit_code: head.exit_code,
                output: head.output,
            });
        }
        Ok(head.output.contains(marker.as_str()))
    }

    async fn exec_shell(
        &self,
        workload_id: &str,
        command: &str,
    ) -> Result<crate::runner::ExecOutput, RuntimeError> {
        let argv = vec!["bash".to_string(), "-lc".to_string(), command.to_string()];
        self.runtime.exec(workload_id, &argv).await
    }
}
