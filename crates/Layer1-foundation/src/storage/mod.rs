//! Storage module for Warden
//!
//! - `atomic`: 임시 파일 쓰기 후 rename (크래시 시에도 레코드 손상 없음)
//! - `json`: JSON - 범용 파일 저장/로드

mod atomic;
mod json;

pub use atomic::{atomic_write, atomic_write_json};
pub use json::JsonStore;
