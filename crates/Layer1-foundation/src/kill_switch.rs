//! Kill switch - 긴급 정지
//!
//! 모든 태스크 취소 토큰은 현재 root 토큰의 자식으로 만들어집니다.
//! `engage()`는 root 를 취소해서 진행 중인 대기(승인, 경로 락, 핸들러)를 한 번에 깨우고,
//! `rearm()`으로 새 root 를 만들기 전까지 새 작업을 거부합니다.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct KillSwitch {
    engaged: AtomicBool,
    root: Mutex<CancellationToken>,
    engaged_at: Mutex<Option<DateTime<Utc>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            engaged: AtomicBool::new(false),
            root: Mutex::new(CancellationToken::new()),
            engaged_at: Mutex::new(None),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// 작동 중이면 에러
    pub fn check(&self) -> Result<()> {
        if self.is_engaged() {
            return Err(Error::KillSwitchEngaged(
                "new work is rejected until the kill switch is re-armed".to_string(),
            ));
        }
        Ok(())
    }

    /// 정지. 이미 작동 중이면 false
    pub fn engage(&self) -> bool {
        let root = self.root.lock();
        if self.engaged.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.engaged_at.lock() = Some(Utc::now());
        root.cancel();
        warn!("Kill switch engaged");
        true
    }

    /// 재무장. 작동 중이 아니면 false
    pub fn rearm(&self) -> bool {
        let mut root = self.root.lock();
        if !self.engaged.load(Ordering::SeqCst) {
            return false;
        }
        *root = CancellationToken::new();
        *self.engaged_at.lock() = None;
        self.engaged.store(false, Ordering::SeqCst);
        info!("Kill switch re-armed");
        true
    }

    /// 현재 root 의 자식 토큰 (정지 상태면 이미 취소된 토큰)
    pub fn child_token(&self) -> CancellationToken {
        self.root.lock().child_token()
    }

    pub fn engaged_at(&self) -> Option<DateTime<Utc>> {
        *self.engaged_at.lock()
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engage_cancels_children() {
        let ks = KillSwitch::new();
        let child = ks.child_token();
        assert!(ks.check().is_ok());

        assert!(ks.engage());
        assert!(!ks.engage());
        assert!(child.is_cancelled());
        assert!(ks.check().is_err());
        assert!(ks.engaged_at().is_some());

        // 정지 중 발급된 토큰은 이미 취소됨
        assert!(ks.child_token().is_cancelled());
    }

    #[test]
    fn test_rearm_issues_fresh_tokens() {
        let ks = KillSwitch::new();
        assert!(!ks.rearm());

        ks.engage();
        assert!(ks.rearm());
        assert!(!ks.is_engaged());
        assert!(!ks.child_token().is_cancelled());
    }
}
