//! Error types for Warden
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Warden 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Task 관련
    // ========================================================================
    #[error("Invalid transition for task {task}: cannot {action} from {from}")]
    InvalidTransition {
        task: String,
        from: String,
        action: String,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Kill switch engaged: {0}")]
    KillSwitchEngaged(String),

    // ========================================================================
    // Tool 관련
    // ========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool} - {message}")]
    ToolExecution { tool: String, message: String },

    // ========================================================================
    // 보안 / 권한 관련
    // ========================================================================
    #[error("Security blocked by {stage}: {reason}")]
    SecurityBlocked { stage: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_) | Error::Timeout(_) | Error::Io(_)
        )
    }

    /// 태스크를 실패 처리하지 않고 외부 재시도를 기다릴 수 있는 에러인지 확인
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::PermissionDenied(_) | Error::ToolNotFound(_))
    }

    /// 보안 게이트에서 발생한 에러인지 확인
    pub fn is_security(&self) -> bool {
        matches!(self, Error::SecurityBlocked { .. })
    }

    /// 분류 이름 (감사 로그 / 태스크 에러 필드용)
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::TaskNotFound(_) => "task_not_found",
            Error::KillSwitchEngaged(_) => "kill_switch",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolExecution { .. } => "execution_error",
            Error::SecurityBlocked { .. } => "security_blocked",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Persistence(_) => "persistence_error",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }

    /// 상태 전이 에러 생성 헬퍼
    pub fn invalid_transition(
        task: impl ToString,
        from: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        Error::InvalidTransition {
            task: task.to_string(),
            from: from.to_string(),
            action: action.into(),
        }
    }

    /// 보안 차단 에러 생성 헬퍼
    pub fn security_blocked(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SecurityBlocked {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Tool 실행 에러 생성 헬퍼
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Persistence("disk full".into()).is_retryable());
        assert!(Error::PermissionDenied("expired".into()).is_recoverable());
        assert!(!Error::tool_execution("run_command", "exit 1").is_recoverable());
        assert!(Error::security_blocked("exfiltration", "secret upload").is_security());
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_transition("abcd1234", "Completed", "start");
        assert_eq!(
            err.to_string(),
            "Invalid transition for task abcd1234: cannot start from Completed"
        );
        assert_eq!(err.kind(), "invalid_transition");
    }
}
