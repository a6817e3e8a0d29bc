//! 권한 타입 정의 - SecurityMode, 카테고리, 정책 테이블

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SecurityMode
// ============================================================================

/// 운영 보안 모드 (순서 있음: Observer < Developer < Admin)
///
/// 도구 노출 여부(ToolRouter)와 카테고리별 기본 정책(PermissionManager)을 함께 결정합니다.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// 읽기 전용 관찰 모드
    Observer,
    /// 일반 개발 모드
    #[default]
    Developer,
    /// 관리자 모드
    Admin,
}

impl SecurityMode {
    pub const ALL: [SecurityMode; 3] = [
        SecurityMode::Observer,
        SecurityMode::Developer,
        SecurityMode::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Developer => "developer",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observer" => Ok(Self::Observer),
            "developer" => Ok(Self::Developer),
            "admin" => Ok(Self::Admin),
            other => Err(crate::Error::Config(format!("Unknown security mode: {}", other))),
        }
    }
}

// ============================================================================
// PermissionCategory
// ============================================================================

/// 권한 카테고리 (고정 열거)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    FileRead,
    FileWrite,
    FileDelete,
    ShellExec,
    NetworkEgress,
    SystemModify,
    CredentialAccess,
}

impl PermissionCategory {
    pub const ALL: [PermissionCategory; 7] = [
        PermissionCategory::FileRead,
        PermissionCategory::FileWrite,
        PermissionCategory::FileDelete,
        PermissionCategory::ShellExec,
        PermissionCategory::NetworkEgress,
        PermissionCategory::SystemModify,
        PermissionCategory::CredentialAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::FileDelete => "file_delete",
            Self::ShellExec => "shell_exec",
            Self::NetworkEgress => "network_egress",
            Self::SystemModify => "system_modify",
            Self::CredentialAccess => "credential_access",
        }
    }

    /// 사람이 읽을 수 있는 설명
    pub fn description(&self) -> &'static str {
        match self {
            Self::FileRead => "Read files inside the workspace",
            Self::FileWrite => "Create or modify files inside the workspace",
            Self::FileDelete => "Delete files inside the workspace",
            Self::ShellExec => "Execute shell commands",
            Self::NetworkEgress => "Send requests to external hosts",
            Self::SystemModify => "Change system configuration or services",
            Self::CredentialAccess => "Read credentials or secret material",
        }
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Policy
// ============================================================================

/// 카테고리별 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    AutoApprove,
    RequireApproval,
    AlwaysDeny,
}

/// 설정 파일에서 기본 정책을 덮어쓰는 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverride {
    pub mode: SecurityMode,
    pub category: PermissionCategory,
    pub policy: PolicyDecision,
}

/// (모드, 카테고리) → 정책 테이블
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    overrides: HashMap<(SecurityMode, PermissionCategory), PolicyDecision>,
}

impl PermissionPolicy {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// 기본 정책
    pub fn default_for(mode: SecurityMode, category: PermissionCategory) -> PolicyDecision {
        use PermissionCategory::*;
        use PolicyDecision::*;

        match (mode, category) {
            (_, FileRead) => AutoApprove,
            (SecurityMode::Observer, _) => AlwaysDeny,

            (SecurityMode::Developer, FileWrite | FileDelete) => AutoApprove,
            (SecurityMode::Developer, ShellExec | NetworkEgress) => RequireApproval,
            (SecurityMode::Developer, SystemModify | CredentialAccess) => AlwaysDeny,

            (SecurityMode::Admin, FileWrite | FileDelete | NetworkEgress) => AutoApprove,
            (SecurityMode::Admin, ShellExec | SystemModify | CredentialAccess) => {
                RequireApproval
            }
        }
    }

    /// 정책 덮어쓰기
    pub fn with_override(
        mut self,
        mode: SecurityMode,
        category: PermissionCategory,
        policy: PolicyDecision,
    ) -> Self {
        self.overrides.insert((mode, category), policy);
        self
    }

    pub fn with_overrides(mut self, overrides: &[PolicyOverride]) -> Self {
        for o in overrides {
            self.overrides.insert((o.mode, o.category), o.policy);
        }
        self
    }

    /// 현재 모드에서의 정책 조회
    pub fn decide(&self, mode: SecurityMode, category: PermissionCategory) -> PolicyDecision {
        self.overrides
            .get(&(mode, category))
            .copied()
            .unwrap_or_else(|| Self::default_for(mode, category))
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ordering() {
        assert!(SecurityMode::Observer < SecurityMode::Developer);
        assert!(SecurityMode::Developer < SecurityMode::Admin);
        assert_eq!("ADMIN".parse::<SecurityMode>().unwrap(), SecurityMode::Admin);
        assert!("root".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_default_policy_table() {
        let policy = PermissionPolicy::new();

        assert_eq!(
            policy.decide(SecurityMode::Developer, PermissionCategory::FileDelete),
            PolicyDecision::AutoApprove
        );
        assert_eq!(
            policy.decide(SecurityMode::Developer, PermissionCategory::ShellExec),
            PolicyDecision::RequireApproval
        );
        assert_eq!(
            policy.decide(SecurityMode::Observer, PermissionCategory::FileWrite),
            PolicyDecision::AlwaysDeny
        );
        assert_eq!(
            policy.decide(SecurityMode::Admin, PermissionCategory::CredentialAccess),
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn test_policy_override() {
        let policy = PermissionPolicy::new().with_override(
            SecurityMode::Developer,
            PermissionCategory::ShellExec,
            PolicyDecision::AutoApprove,
        );

        assert_eq!(
            policy.decide(SecurityMode::Developer, PermissionCategory::ShellExec),
            PolicyDecision::AutoApprove
        );
        // 다른 모드는 영향 없음
        assert_eq!(
            policy.decide(SecurityMode::Admin, PermissionCategory::ShellExec),
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&PermissionCategory::NetworkEgress).unwrap();
        assert_eq!(json, "\"network_egress\"");
        let policy: PolicyDecision = serde_json::from_str("\"REQUIRE_APPROVAL\"").unwrap();
        assert_eq!(policy, PolicyDecision::RequireApproval);
    }
}
