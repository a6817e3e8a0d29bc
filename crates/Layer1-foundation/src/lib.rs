//! # warden-foundation
//!
//! Foundation layer for Warden:
//! - Error: 에러 분류 (InvalidTransition, SecurityBlocked, PermissionDenied ...)
//! - Config: 통합 설정 (WardenConfig)
//! - Permission: SecurityMode, 카테고리 정책, 승인 워크플로우
//! - Security: 위험도 분석, 스캔 단계, 격리, 점수 합산
//! - Audit: append-only 감사 로그
//! - Storage: JsonStore, atomic write
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  ToolRouter (warden-tool)                               │
//! │     │                                                   │
//! │     ├──▶ SecurityLayer ──▶ QuarantineSystem             │
//! │     │      (injection, malware, exfiltration)           │
//! │     ├──▶ CommandRiskAnalyzer ──▶ RiskScoringEngine      │
//! │     ├──▶ PermissionManager (AUTO / REQUIRE / DENY)      │
//! │     └──▶ AuditLog (ToolCallRecord)                      │
//! │                                                         │
//! │  KillSwitch ──▶ CancellationToken (모든 대기 해제)       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod kill_switch;
pub mod logging;
pub mod permission;
pub mod security;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    AuditConfig, LoggingConfig, SecurityConfig, TaskConfig, WardenConfig, WARDEN_CONFIG_FILE,
};
pub use logging::init_tracing;

// ============================================================================
// Permission (권한 시스템)
// ============================================================================
pub use permission::{
    Decision, PermissionAsk, PermissionCategory, PermissionEvent, PermissionManager,
    PermissionPolicy, PermissionRequest, PolicyDecision, PolicyOverride, RequestId, RequestStatus,
    SecurityMode, DEFAULT_PERMISSION_TIMEOUT,
};

// ============================================================================
// Security (보안 게이트)
// ============================================================================
pub use security::{
    redact_args, CommandRiskAnalyzer, FileOperation, QuarantineEntry, QuarantineSystem,
    RiskAssessment, RiskCategory, RiskScore, RiskScoringEngine, RiskSubject, RiskThresholds,
    ScanReport, ScanStage, SecurityEvent, SecurityLayer, StageVerdict, ThreatLevel,
    WorkspaceBoundary,
};

// ============================================================================
// Audit (감사 로그)
// ============================================================================
pub use audit::{
    AuditEntry, AuditId, AuditKind, AuditLog, AuditQuery, AuditRecord, CallOutcome,
    SecurityVerdict, ToolCallRecord, AUDIT_LOG_FILE,
};

// ============================================================================
// Kill Switch
// ============================================================================
pub use kill_switch::KillSwitch;

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{atomic_write, atomic_write_json, JsonStore};
