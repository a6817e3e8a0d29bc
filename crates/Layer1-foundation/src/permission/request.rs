//! Permission request - 승인 요청 레코드

use super::types::PermissionCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 승인 요청 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// 요청 상태 (PENDING → APPROVED | DENIED | EXPIRED, 정확히 한 번)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl RequestStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
    /// 타임아웃 (요청은 EXPIRED)
    Expired,
    /// 태스크 취소 또는 kill switch 로 대기가 중단됨
    Cancelled,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    pub(crate) fn from_status(status: RequestStatus) -> Option<Self> {
        match status {
            RequestStatus::Pending => None,
            RequestStatus::Approved => Some(Decision::Approved),
            RequestStatus::Denied => Some(Decision::Denied),
            RequestStatus::Expired => Some(Decision::Expired),
        }
    }
}

/// 사람의 승인을 기다리는 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: RequestId,
    pub task_id: String,
    pub category: PermissionCategory,
    pub risk_score: u32,
    /// 승인자에게 보여줄 요약 (도구 이름, 대상 등)
    pub detail: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 해결 사유 (예: "timeout", "cancelled", "kill switch")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PermissionRequest {
    pub fn new(
        task_id: impl Into<String>,
        category: PermissionCategory,
        risk_score: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            task_id: task_id.into(),
            category,
            risk_score,
            detail: detail.into(),
            status: RequestStatus::Pending,
            requested_at: Utc::now(),
            resolved_at: None,
            note: None,
        }
    }

    /// PENDING 일 때만 상태를 바꿈. 이미 해결된 요청이면 false
    pub(crate) fn resolve(&mut self, status: RequestStatus, note: Option<String>) -> bool {
        if self.status.is_resolved() || !status.is_resolved() {
            return false;
        }
        self.status = status;
        self.resolved_at = Some(Utc::now());
        self.note = note;
        true
    }
}
