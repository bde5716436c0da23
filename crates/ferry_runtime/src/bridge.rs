//! The execution bridge.
//!
//! One call runs one agent: resolve the descriptor, marshal the payload,
//! supervise the process, demarshal its output. Artifacts belong to the
//! invocation and are removed when it is dropped, whichever way the call
//! ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_agent::{
    AgentDescriptor, AgentRegistry, Invocation, SweepReport, demarshal, marshal, sweep_artifacts,
};
use ferry_core::{BridgeResult, CacheKey, ExecutionId, ExecutionRequest, Payload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::cache::{CacheStats, ResultCache};
use crate::config::BridgeConfig;
use crate::health::{self, HealthReport};
use crate::limiter::ConcurrencyLimiter;
use crate::monitor::{ExecutionMonitor, Metrics};
use crate::orchestrator::StepExecutor;
use crate::supervisor::supervise;

/// Successful outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResult {
    /// Execution that produced this result
    pub execution_id: ExecutionId,
    /// Agent name
    pub agent: String,
    /// Demarshaled output
    pub payload: Payload,
    /// False only for raw-stream agents that exited non-zero
    pub success: bool,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock time of the process
    pub duration_ms: u64,
    /// When the result was produced
    pub completed_at: DateTime<Utc>,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Deadline, overriding the descriptor and config defaults
    pub timeout: Option<Duration>,
    /// Skip a cached result and store the fresh one
    pub bypass_cache: bool,
    /// Route through the result cache under this key
    pub cache_key: Option<CacheKey>,
}

impl ExecuteOptions {
    /// Options with every default
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cache the result under `key`
    #[must_use]
    pub fn cached(mut self, key: CacheKey) -> Self {
        self.cache_key = Some(key);
        self
    }

    /// Recompute even if a result is cached
    #[must_use]
    pub const fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Cross-runtime execution bridge
pub struct Bridge {
    registry: Arc<AgentRegistry>,
    config: BridgeConfig,
    cache: ResultCache<StructuredResult>,
    limiter: ConcurrencyLimiter,
    monitor: ExecutionMonitor,
}

impl Bridge {
    /// Create a bridge over a fully built registry
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, config: BridgeConfig) -> Self {
        Self {
            cache: ResultCache::new(config.cache_capacity),
            limiter: ConcurrencyLimiter::new(config.max_concurrent),
            monitor: ExecutionMonitor::new(),
            registry,
            config,
        }
    }

    /// Run `agent` on `payload`
    ///
    /// # Errors
    ///
    /// `UnknownAgent` before anything is started, otherwise any marshaling,
    /// process or output error of this execution
    pub async fn execute(
        &self,
        agent: &str,
        payload: Payload,
        options: ExecuteOptions,
    ) -> BridgeResult<StructuredResult> {
        self.execute_as(agent, payload, ExecutionId::new(), options).await
    }

    /// Run a prepared request, keeping its execution id
    ///
    /// # Errors
    ///
    /// Same as [`Bridge::execute`]
    pub async fn execute_request(
        &self,
        request: ExecutionRequest,
        options: ExecuteOptions,
    ) -> BridgeResult<StructuredResult> {
        self.execute_as(&request.agent, request.payload, request.execution_id, options)
            .await
    }

    async fn execute_as(
        &self,
        agent: &str,
        payload: Payload,
        execution_id: ExecutionId,
        options: ExecuteOptions,
    ) -> BridgeResult<StructuredResult> {
        let descriptor = self.registry.resolve(agent)?;
        let Some(key) = options.cache_key else {
            return self
                .run_once(agent, descriptor, payload, execution_id, options.timeout)
                .await;
        };

        let mut computed = false;
        let result = self
            .cache
            .get_or_compute(key, options.bypass_cache, || {
                computed = true;
                self.run_once(agent, descriptor, payload, execution_id, options.timeout)
            })
            .await;
        if !computed && result.is_ok() {
            tracing::debug!(agent, key = %key, "served from cache");
            self.monitor.record_cache_hit();
        }
        result
    }

    async fn run_once(
        &self,
        agent: &str,
        descriptor: &AgentDescriptor,
        payload: Payload,
        execution_id: ExecutionId,
        timeout: Option<Duration>,
    ) -> BridgeResult<StructuredResult> {
        let deadline = timeout
            .or_else(|| descriptor.default_timeout_ms.map(Duration::from_millis))
            .unwrap_or(self.config.default_timeout);
        let span = tracing::info_span!("execute", agent, %execution_id);

        async move {
            let _permit = self.limiter.acquire().await;
            let invocation = marshal(
                agent,
                descriptor,
                &payload,
                execution_id,
                &self.config.artifact_dir,
            )?;

            let _in_flight = self.monitor.record_start();
            let outcome = invoke(agent, descriptor, &invocation, execution_id, deadline).await;
            self.monitor.record_finish(&outcome);
            drop(invocation);

            match &outcome {
                Ok(result) => tracing::info!(
                    success = result.success,
                    duration_ms = result.duration_ms,
                    "agent execution finished"
                ),
                Err(e) => tracing::warn!(kind = ?e.kind(), error = %e, "agent execution failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Liveness check of one agent; never fails
    pub async fn validate(&self, agent: &str) -> HealthReport {
        match self.registry.resolve(agent) {
            Ok(descriptor) => {
                health::check(
                    agent,
                    descriptor,
                    self.config.smoke_timeout,
                    self.config.allow_credentialed_smoke_tests,
                )
                .await
            }
            Err(_) => HealthReport::unknown(agent),
        }
    }

    /// Liveness check of every registered agent, in registration order
    pub async fn validate_all(&self) -> Vec<HealthReport> {
        let checks = self.registry.iter().map(|(name, descriptor)| {
            health::check(
                name,
                descriptor,
                self.config.smoke_timeout,
                self.config.allow_credentialed_smoke_tests,
            )
        });
        futures::future::join_all(checks).await
    }

    /// Remove leftover artifacts older than `min_age`
    ///
    /// # Errors
    ///
    /// Returns `Io` if the artifact directory cannot be listed
    pub fn sweep(&self, min_age: Duration) -> BridgeResult<SweepReport> {
        let report = sweep_artifacts(&self.config.artifact_dir, min_age)?;
        if !report.removed.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                dir = %self.config.artifact_dir.display(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "swept stale artifacts"
            );
        }
        Ok(report)
    }

    /// Execution counters
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.monitor.snapshot()
    }

    /// Cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// The registry
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The configuration
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

async fn invoke(
    agent: &str,
    descriptor: &AgentDescriptor,
    invocation: &Invocation,
    execution_id: ExecutionId,
    deadline: Duration,
) -> BridgeResult<StructuredResult> {
    let raw = supervise(agent, execution_id, invocation, deadline).await?;
    let stderr = raw.stderr.clone();
    let elapsed = raw.elapsed;
    let out = demarshal(
        agent,
        execution_id,
        &descriptor.output_encoding,
        raw,
        &invocation.artifacts,
    )?;
    Ok(StructuredResult {
        execution_id,
        agent: agent.to_string(),
        payload: out.payload,
        success: out.success,
        stderr,
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        completed_at: Utc::now(),
    })
}

#[async_trait]
impl StepExecutor for Bridge {
    async fn execute_step(
        &self,
        agent: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> BridgeResult<StructuredResult> {
        let options = ExecuteOptions {
            timeout,
            ..ExecuteOptions::default()
        };
        self.execute(agent, payload, options).await
    }

    fn known_agents(&self) -> Option<Vec<String>> {
        Some(self.registry.list())
    }
}
