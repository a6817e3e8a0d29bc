//! Audit System - 감사 로깅 시스템
//!
//! 도구 호출, 승인 요청 해결, 격리, kill switch 를 append-only 로 기록합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AuditLog                              │
//! │  append(record) ──► ring buffer ──► audit.jsonl (optional)  │
//! │         │                                                   │
//! │         └──► broadcast ──► 외부 모니터 (읽기 전용)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 사용법
//!
//! ```ignore
//! use warden_foundation::audit::{AuditLog, AuditQuery, AuditKind};
//!
//! let log = AuditLog::with_file(data_dir.join(AUDIT_LOG_FILE), 10_000)?;
//! let mut rx = log.subscribe();
//!
//! let calls = log.query(&AuditQuery::new().with_kinds(vec![AuditKind::ToolCall]));
//! ```

pub mod logger;
pub mod types;

// Re-exports
pub use logger::{AuditLog, AUDIT_LOG_FILE};
pub use types::{
    AuditEntry, AuditId, AuditKind, AuditQuery, AuditRecord, CallOutcome, SecurityVerdict,
    ToolCallRecord,
};
