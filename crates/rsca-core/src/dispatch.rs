//! Request/response boundary for the engine.
//!
//! [`dispatch`] is the synchronous core: it runs one [`EngineRequest`] to
//! completion and turns any error into a failure [`EngineResponse`] carrying
//! the same correlation id and kind. [`ComputationDispatcher`] moves that
//! work onto the blocking pool behind a semaphore and hands the caller a
//! [`DispatchHandle`] to await.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::distribution::{
    distribute, redistribute, validate_locked, AnchorMap, RedistributionParams,
    RedistributionResult, DEFAULT_TOLERANCE,
};
use crate::domain::{ensure_finite, round2, validate_ranks, Cycle, MemberScore, Result, TargetConfig};
use crate::metrics::METRICS;
use crate::obs::{self, RequestSpan};
use crate::policy::{PolicyLimits, ProportionalLimits};
use crate::risk::{summarize_group_risk, GroupRiskSummary};
use crate::trajectory::{partition_by_group, project, project_adaptive, TrajectoryPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    Redistribute,
    CalculateStrategy,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redistribute => "REDISTRIBUTE",
            Self::CalculateStrategy => "CALCULATE_STRATEGY",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-assigned id echoed verbatim on the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for callers that do not track their own.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One unit of work, discriminated by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineRequest {
    /// Merge anchors into the roster and distribute toward a target average.
    Redistribute {
        correlation_id: CorrelationId,
        members: Vec<MemberScore>,
        #[serde(default)]
        anchors: AnchorMap,
        params: RedistributionParams,
    },
    /// Project every group's trajectory and fill each pending cycle with a score plan.
    CalculateStrategy {
        correlation_id: CorrelationId,
        cycles: Vec<Cycle>,
        ceiling: f64,
        /// When present, pending cycles use adaptive targets instead of the fixed ceiling.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        adaptive: Option<TargetConfig>,
    },
}

impl EngineRequest {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::Redistribute { correlation_id, .. }
            | Self::CalculateStrategy { correlation_id, .. } => correlation_id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Redistribute { .. } => RequestKind::Redistribute,
            Self::CalculateStrategy { .. } => RequestKind::CalculateStrategy,
        }
    }
}

/// Score plan for one pending cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePlan {
    pub cycle_id: String,
    pub group_key: String,
    /// Optimal average solved by the projection.
    pub target_average: f64,
    pub achieved_average: f64,
    /// Members in rank order carrying their planned scores.
    pub members: Vec<MemberScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStrategy {
    pub trajectory: Vec<TrajectoryPoint>,
    pub plans: Vec<CyclePlan>,
    pub risk: GroupRiskSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub groups: BTreeMap<String, GroupStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineResult {
    Redistribution(RedistributionResult),
    Strategy(StrategyResult),
}

/// Outcome of one request; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub success: bool,
    pub correlation_id: CorrelationId,
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EngineResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineResponse {
    pub fn success(correlation_id: CorrelationId, kind: RequestKind, result: EngineResult) -> Self {
        Self {
            success: true,
            correlation_id,
            kind,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(correlation_id: CorrelationId, kind: RequestKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            correlation_id,
            kind,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Run one request to completion on the current thread.
///
/// Never returns an error: computation failures become failure responses.
pub fn dispatch(request: EngineRequest, limits: &dyn PolicyLimits) -> EngineResponse {
    dispatch_with_tolerance(request, limits, DEFAULT_TOLERANCE)
}

fn dispatch_with_tolerance(
    request: EngineRequest,
    limits: &dyn PolicyLimits,
    default_tolerance: f64,
) -> EngineResponse {
    let correlation_id = request.correlation_id().clone();
    let kind = request.kind();
    let _span = RequestSpan::enter(correlation_id.as_str(), kind.as_str());

    match execute(request, limits, default_tolerance) {
        Ok(result) => EngineResponse::success(correlation_id, kind, result),
        Err(e) => EngineResponse::failure(correlation_id, kind, e.to_string()),
    }
}

fn execute(
    request: EngineRequest,
    limits: &dyn PolicyLimits,
    default_tolerance: f64,
) -> Result<EngineResult> {
    match request {
        EngineRequest::Redistribute {
            members,
            anchors,
            mut params,
            ..
        } => {
            params.tolerance.get_or_insert(default_tolerance);
            let result = redistribute(&members, &anchors, &params, limits)?;
            METRICS.add_members_distributed(result.scores.len() as u64);
            Ok(EngineResult::Redistribution(result))
        }
        EngineRequest::CalculateStrategy {
            cycles,
            ceiling,
            adaptive,
            ..
        } => calculate_strategy(&cycles, ceiling, adaptive.as_ref()).map(EngineResult::Strategy),
    }
}

/// Project each group partition, then distribute every pending cycle toward
/// the average its projection solved for.
pub fn calculate_strategy(
    cycles: &[Cycle],
    ceiling: f64,
    adaptive: Option<&TargetConfig>,
) -> Result<StrategyResult> {
    let ceiling = ensure_finite("ceiling", ceiling)?;
    let mut groups = BTreeMap::new();

    for (key, group) in partition_by_group(cycles) {
        let trajectory = match adaptive {
            Some(config) => project_adaptive(&group, config)?,
            None => project(&group, ceiling)?,
        };
        let plans = trajectory
            .iter()
            .filter(|p| p.is_projected)
            .filter_map(|point| {
                group
                    .iter()
                    .find(|c| c.id == point.cycle_id && !c.status.is_final())
                    .map(|cycle| plan_cycle(cycle, point.cycle_average))
            })
            .collect::<Result<Vec<_>>>()?;

        METRICS.add_cycles_projected(plans.len() as u64);
        obs::emit_trajectory_projected(
            &key,
            trajectory.len(),
            plans.len(),
            trajectory.last().map_or(0.0, |p| p.cumulative_average),
        );

        let risk = summarize_group_risk(&trajectory);
        groups.insert(
            key,
            GroupStrategy {
                trajectory,
                plans,
                risk,
            },
        );
    }

    Ok(StrategyResult { groups })
}

fn plan_cycle(cycle: &Cycle, target_average: f64) -> Result<CyclePlan> {
    let mut members = cycle.members.clone();
    validate_ranks(&members)?;
    validate_locked(&members)?;
    members.sort_by_key(|m| m.rank);

    let distribution = distribute(&members, target_average)?;
    for (member, score) in members.iter_mut().zip(&distribution.scores) {
        member.score = *score;
    }
    METRICS.add_members_distributed(members.len() as u64);

    Ok(CyclePlan {
        cycle_id: cycle.id.clone(),
        group_key: cycle.group_key.clone(),
        target_average,
        achieved_average: round2(distribution.achieved_average),
        members,
    })
}

// ---------------------------------------------------------------------------
// Async boundary
// ---------------------------------------------------------------------------

/// Runs requests off the caller's task with bounded concurrency.
#[derive(Clone)]
pub struct ComputationDispatcher {
    limits: Arc<dyn PolicyLimits>,
    semaphore: Arc<Semaphore>,
    default_tolerance: f64,
}

impl std::fmt::Debug for ComputationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationDispatcher")
            .field("available_permits", &self.semaphore.available_permits())
            .field("default_tolerance", &self.default_tolerance)
            .finish()
    }
}

impl Default for ComputationDispatcher {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            limits: Arc::new(ProportionalLimits::default()),
            semaphore: Arc::new(Semaphore::new(config.dispatcher.max_concurrent)),
            default_tolerance: config.redistribution.tolerance,
        }
    }
}

impl ComputationDispatcher {
    pub fn new(config: &EngineConfig, limits: Arc<dyn PolicyLimits>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limits,
            semaphore: Arc::new(Semaphore::new(config.dispatcher.max_concurrent)),
            default_tolerance: config.redistribution.tolerance,
        })
    }

    /// Start computing `request` and return a handle to its response.
    ///
    /// Must be called from within a Tokio runtime. There is no cancellation:
    /// dropping the handle discards the response but the computation still runs.
    pub fn submit(&self, request: EngineRequest) -> DispatchHandle {
        let correlation_id = request.correlation_id().clone();
        let kind = request.kind();

        METRICS.inc_requests_dispatched();
        obs::emit_request_dispatched(correlation_id.as_str(), kind.as_str());

        let limits = Arc::clone(&self.limits);
        let semaphore = Arc::clone(&self.semaphore);
        let default_tolerance = self.default_tolerance;
        let id = correlation_id.clone();

        let task = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let started = Instant::now();

            let computed = tokio::task::spawn_blocking(move || {
                dispatch_with_tolerance(request, limits.as_ref(), default_tolerance)
            })
            .await;

            let response = match computed {
                Ok(response) => response,
                Err(e) => EngineResponse::failure(id, kind, format!("computation task failed: {e}")),
            };
            record_outcome(&response, started.elapsed().as_millis() as u64);
            response
        });

        DispatchHandle {
            correlation_id,
            kind,
            task,
        }
    }

    /// Submit a batch concurrently; responses come back in submission order.
    pub async fn submit_all(&self, requests: Vec<EngineRequest>) -> Vec<EngineResponse> {
        let handles: Vec<DispatchHandle> = requests.into_iter().map(|r| self.submit(r)).collect();
        futures::future::join_all(handles.into_iter().map(DispatchHandle::response)).await
    }
}

fn record_outcome(response: &EngineResponse, duration_ms: u64) {
    let id = response.correlation_id.as_str();
    let kind = response.kind.as_str();
    match &response.error {
        None => obs::emit_request_completed(id, kind, duration_ms),
        Some(error) => {
            METRICS.inc_requests_failed();
            obs::emit_request_failed(id, kind, error);
        }
    }
}

/// Pending response for one submitted request.
#[derive(Debug)]
pub struct DispatchHandle {
    correlation_id: CorrelationId,
    kind: RequestKind,
    task: JoinHandle<EngineResponse>,
}

impl DispatchHandle {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the computation to finish.
    pub async fn response(self) -> EngineResponse {
        match self.task.await {
            Ok(response) => response,
            Err(e) => {
                METRICS.inc_requests_failed();
                EngineResponse::failure(
                    self.correlation_id,
                    self.kind,
                    format!("dispatch task failed: {e}"),
                )
            }
        }
    }
}
