//! Permission system for Warden
//!
//! - `types`: SecurityMode, PermissionCategory, 정책 테이블 (PermissionPolicy)
//! - `request`: 승인 요청 레코드 (PermissionRequest, Decision)
//! - `manager`: 승인 워크플로우 (PermissionManager)
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use warden_foundation::permission::{PermissionAsk, PermissionCategory, PermissionManager};
//!
//! let manager = PermissionManager::new(SecurityMode::Developer);
//! let decision = manager
//!     .request_and_wait(
//!         PermissionAsk::new(task_id, PermissionCategory::ShellExec, 65).with_detail("sudo ..."),
//!         &cancel_token,
//!     )
//!     .await;
//!
//! // 다른 곳 (승인자 UI)
//! for req in manager.pending() {
//!     manager.approve(req.id)?;
//! }
//! ```

mod manager;
mod request;
mod types;

pub use manager::{PermissionAsk, PermissionEvent, PermissionManager, DEFAULT_PERMISSION_TIMEOUT};
pub use request::{Decision, PermissionRequest, RequestId, RequestStatus};
pub use types::{
    PermissionCategory, PermissionPolicy, PolicyDecision, PolicyOverride, SecurityMode,
};
