//! Audit Log Types - 감사 로그 타입 정의
//!
//! 도구 호출 기록, 승인 요청 해결, 격리/kill switch 이벤트를 위한 타입들입니다.

use crate::permission::PermissionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Audit Entry ID
// ============================================================================

/// 감사 로그 엔트리 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tool Call Record
// ============================================================================

/// 보안 게이트 판정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SecurityVerdict {
    /// 모든 단계 통과
    Pass,
    /// 특정 단계에서 차단 (quarantine, risk 포함)
    Flagged { stage: String, reason: String },
    /// 보안 검사 전에 종료 (도구 없음 등)
    NotScanned,
}

impl SecurityVerdict {
    pub fn flagged(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Flagged {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// 도구 호출 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failed { kind: String, message: String },
}

impl CallOutcome {
    pub fn from_error(err: &crate::Error) -> Self {
        Self::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// ToolRouter.call 한 번당 정확히 하나 생성되는 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: AuditId,
    pub task_id: Option<String>,
    pub tool_name: String,
    /// 시크릿이 제거된 인자
    pub args: Value,
    pub security_verdict: SecurityVerdict,
    pub risk_score: u32,
    /// SAFE / CAUTION / DANGEROUS / BLOCKED (분석하지 않았으면 None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_category: Option<String>,
    pub outcome: CallOutcome,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Audit Record
// ============================================================================

/// 감사 로그에 추가되는 레코드 종류
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    ToolCall(ToolCallRecord),
    PermissionResolved(PermissionRequest),
    Quarantined { subject: String, reason: String },
    QuarantineCleared { subject: String },
    KillSwitch { engaged: bool, tasks_cancelled: usize },
}

impl AuditRecord {
    pub fn kind(&self) -> AuditKind {
        match self {
            Self::ToolCall(_) => AuditKind::ToolCall,
            Self::PermissionResolved(_) => AuditKind::PermissionResolved,
            Self::Quarantined { .. } => AuditKind::Quarantined,
            Self::QuarantineCleared { .. } => AuditKind::QuarantineCleared,
            Self::KillSwitch { .. } => AuditKind::KillSwitch,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall(r) => r.task_id.as_deref(),
            Self::PermissionResolved(r) => Some(r.task_id.as_str()),
            _ => None,
        }
    }
}

/// 레코드 종류 (쿼리용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    ToolCall,
    PermissionResolved,
    Quarantined,
    QuarantineCleared,
    KillSwitch,
}

/// 순번이 붙은 감사 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: AuditRecord,
}

// ============================================================================
// Query
// ============================================================================

/// 감사 로그 조회 조건
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub kinds: Option<Vec<AuditKind>>,
    pub task_id: Option<String>,
    pub tool_name: Option<String>,
    pub since_seq: Option<u64>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: Vec<AuditKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn since(mut self, seq: u64) -> Self {
        self.since_seq = Some(seq);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entry.record.kind()) {
                return false;
            }
        }
        if let Some(since) = self.since_seq {
            if entry.seq < since {
                return false;
            }
        }
        if let Some(task_id) = &self.task_id {
            if entry.record.task_id() != Some(task_id.as_str()) {
                return false;
            }
        }
        if let Some(tool) = &self.tool_name {
            match &entry.record {
                AuditRecord::ToolCall(r) if &r.tool_name == tool => {}
                _ => return false,
            }
        }
        true
    }
}
