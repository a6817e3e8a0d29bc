//! Config - 통합 설정 관리
//!
//! - `warden.rs` - WardenConfig (security / tasks / audit / logging)

mod warden;

pub use warden::{
    AuditConfig, LoggingConfig, SecurityConfig, TaskConfig, WardenConfig, WARDEN_CONFIG_FILE,
};
