//! RSCA Core Library
//!
//! Trajectory projection, rank-ordered score redistribution and risk analysis
//! for a group's cumulative evaluation average. All numeric components are
//! pure; [`ComputationDispatcher`] is the only async boundary.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod distribution;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod policy;
pub mod risk;
pub mod telemetry;
pub mod trajectory;

pub use aggregate::{cumulative_average, flexibility, project_cumulative, sensitivity, trait_average};

pub use config::{DispatcherConfig, EngineConfig, RedistributionDefaults};

pub use dispatch::{
    calculate_strategy, dispatch, ComputationDispatcher, CorrelationId, CyclePlan, DispatchHandle,
    EngineRequest, EngineResponse, EngineResult, GroupStrategy, RequestKind, StrategyResult,
};

pub use distribution::{
    apply_anchors, distribute, feasible_range, redistribute, suggest_anchor_edits,
    validate_locked, AnchorMap, ChangedMember, Distribution, FeasibleRange, ReasonCode,
    RedistributionParams, RedistributionResult, SuggestedAnchorEdit, ANCHOR_NUDGE,
    DEFAULT_TOLERANCE, MAX_ANCHOR_SUGGESTIONS, RANK_DECAY,
};

pub use domain::{
    round2, validate_ranks, CategoryPolicy, Cycle, CycleStatus, EngineError, MemberScore,
    RecommendationCategory, Result, TargetConfig, LOW_TIER_CEILING, NOT_OBSERVED, OBSERVED_FLOOR,
    SCORE_CEILING, SCORE_MIN,
};

pub use metrics::METRICS;

pub use obs::{
    emit_request_completed, emit_request_dispatched, emit_request_failed,
    emit_trajectory_projected, RequestSpan,
};

pub use policy::{
    cap, check_quota, tier_counts, GradeBand, PolicyContext, PolicyLimits, ProportionalLimits,
    QuotaCheck, QuotaViolation,
};

pub use telemetry::init_tracing;

pub use risk::{
    analyze, recovery_plan, risk_severity, summarize_group_risk, trajectory_health,
    GroupRiskSummary, RecoveryDifficulty, RecoveryPlan, RiskAnalysis, RiskRecommendations,
    RiskSeverity, ScoreRange, TrajectoryHealth, TrendDirection,
};

pub use trajectory::{
    max_cycle_average, partition_by_group, project, project_adaptive, project_by_group,
    RunningTotals, TrajectoryPoint,
};

/// Crate version, shared across the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
