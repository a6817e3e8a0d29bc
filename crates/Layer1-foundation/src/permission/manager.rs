//! Permission manager - 사람 승인 워크플로우
//!
//! 카테고리 정책이 REQUIRE_APPROVAL 일 때만 요청을 만들고 호출자를 대기시킵니다.
//! 대기는 oneshot 채널로 깨어나며 취소 토큰과 타임아웃을 함께 기다립니다.

use super::request::{Decision, PermissionRequest, RequestId, RequestStatus};
use super::types::{PermissionCategory, PermissionPolicy, PolicyDecision, SecurityMode};
use crate::audit::AuditLog;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 기본 승인 대기 시간
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(120);

const EVENT_CAPACITY: usize = 64;

/// 승인자 UI 용 이벤트
#[derive(Debug, Clone)]
pub enum PermissionEvent {
    Requested(PermissionRequest),
    Resolved(PermissionRequest),
}

/// 대기 요청 1건에 대한 승인 질의
#[derive(Debug, Clone)]
pub struct PermissionAsk {
    pub task_id: String,
    pub category: PermissionCategory,
    pub risk_score: u32,
    pub detail: String,
    pub timeout: Option<Duration>,
}

impl PermissionAsk {
    pub fn new(task_id: impl Into<String>, category: PermissionCategory, risk_score: u32) -> Self {
        Self {
            task_id: task_id.into(),
            category,
            risk_score,
            detail: String::new(),
            timeout: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct RequestSlot {
    request: PermissionRequest,
    waker: Option<oneshot::Sender<Decision>>,
}

/// 승인 요청 저장소 + 정책
pub struct PermissionManager {
    mode: RwLock<SecurityMode>,
    policy: RwLock<PermissionPolicy>,
    default_timeout: Duration,
    requests: Mutex<HashMap<RequestId, RequestSlot>>,
    audit: Option<Arc<AuditLog>>,
    events: broadcast::Sender<PermissionEvent>,
}

impl PermissionManager {
    pub fn new(mode: SecurityMode) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            mode: RwLock::new(mode),
            policy: RwLock::new(PermissionPolicy::new()),
            default_timeout: DEFAULT_PERMISSION_TIMEOUT,
            requests: Mutex::new(HashMap::new()),
            audit: None,
            events,
        }
    }

    pub fn with_policy(self, policy: PermissionPolicy) -> Self {
        *self.policy.write() = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    // ========================================================================
    // Mode / Policy
    // ========================================================================

    pub fn mode(&self) -> SecurityMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: SecurityMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Security mode changed");
        }
    }

    /// 현재 모드에서 카테고리 정책
    pub fn policy_for(&self, category: PermissionCategory) -> PolicyDecision {
        self.policy.read().decide(self.mode(), category)
    }

    pub fn set_policy(&self, policy: PermissionPolicy) {
        *self.policy.write() = policy;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Request / Wait
    // ========================================================================

    /// 정책에 따라 즉시 결정하거나 승인 요청을 만들고 대기
    ///
    /// `cancel` 이 취소되면 타임아웃을 기다리지 않고 `Decision::Cancelled` 로 깨어납니다.
    pub async fn request_and_wait(&self, ask: PermissionAsk, cancel: &CancellationToken) -> Decision {
        match self.policy_for(ask.category) {
            PolicyDecision::AutoApprove => {
                debug!(task_id = %ask.task_id, category = %ask.category, "Auto-approved");
                return Decision::Approved;
            }
            PolicyDecision::AlwaysDeny => {
                debug!(task_id = %ask.task_id, category = %ask.category, "Denied by policy");
                return Decision::Denied;
            }
            PolicyDecision::RequireApproval => {}
        }

        if cancel.is_cancelled() {
            return Decision::Cancelled;
        }

        let timeout = ask.timeout.unwrap_or(self.default_timeout);
        let request = PermissionRequest::new(ask.task_id, ask.category, ask.risk_score, ask.detail);
        let id = request.id;
        let (tx, rx) = oneshot::channel();

        self.requests.lock().insert(
            id,
            RequestSlot {
                request: request.clone(),
                waker: Some(tx),
            },
        );
        info!(
            request_id = %id,
            task_id = %request.task_id,
            category = %request.category,
            risk_score = request.risk_score,
            "Permission requested"
        );
        let _ = self.events.send(PermissionEvent::Requested(request));

        // future 가 중간에 drop 되면 요청을 닫음
        let mut guard = PendingGuard {
            manager: self,
            id,
            armed: true,
        };

        let decision = tokio::select! {
            biased;
            received = rx => match received {
                Ok(decision) => decision,
                Err(_) => self.decision_of(id).unwrap_or(Decision::Denied),
            },
            _ = cancel.cancelled() => {
                self.resolve(id, RequestStatus::Denied, Some("cancelled"), Decision::Cancelled)
                    .map(|_| Decision::Cancelled)
                    .unwrap_or_else(|existing| existing)
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(request_id = %id, ?timeout, "Permission request expired");
                self.resolve(id, RequestStatus::Expired, Some("timeout"), Decision::Expired)
                    .map(|_| Decision::Expired)
                    .unwrap_or_else(|existing| existing)
            }
        };

        guard.armed = false;
        decision
    }

    /// 승인. 이미 해결된 요청이면 기존 결정을 그대로 반환
    pub fn approve(&self, id: RequestId) -> Result<Decision> {
        self.decide(id, RequestStatus::Approved, Decision::Approved)
    }

    /// 거부. 이미 해결된 요청이면 기존 결정을 그대로 반환
    pub fn deny(&self, id: RequestId) -> Result<Decision> {
        self.decide(id, RequestStatus::Denied, Decision::Denied)
    }

    fn decide(&self, id: RequestId, status: RequestStatus, decision: Decision) -> Result<Decision> {
        if !self.requests.lock().contains_key(&id) {
            return Err(Error::InvalidInput(format!("Unknown permission request: {}", id)));
        }
        Ok(self
            .resolve(id, status, None, decision)
            .map(|_| decision)
            .unwrap_or_else(|existing| existing))
    }

    /// 모든 대기 요청을 거부하고 대기자를 `Cancelled` 로 깨움 (kill switch)
    pub fn cancel_all(&self, note: &str) -> usize {
        let pending: Vec<RequestId> = self
            .requests
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.request.status.is_resolved())
            .map(|(id, _)| *id)
            .collect();

        pending
            .into_iter()
            .filter(|id| {
                self.resolve(*id, RequestStatus::Denied, Some(note), Decision::Cancelled)
                    .is_ok()
            })
            .count()
    }

    /// PENDING → status. 이미 해결되었으면 Err(기존 결정)
    fn resolve(
        &self,
        id: RequestId,
        status: RequestStatus,
        note: Option<&str>,
        wake_with: Decision,
    ) -> std::result::Result<(), Decision> {
        let resolved = {
            let mut requests = self.requests.lock();
            let slot = match requests.get_mut(&id) {
                Some(slot) => slot,
                None => return Err(Decision::Denied),
            };
            if !slot.request.resolve(status, note.map(String::from)) {
                return Err(Decision::from_status(slot.request.status).unwrap_or(Decision::Denied));
            }
            if let Some(waker) = slot.waker.take() {
                let _ = waker.send(wake_with);
            }
            slot.request.clone()
        };

        debug!(request_id = %id, status = ?resolved.status, "Permission request resolved");
        if let Some(audit) = &self.audit {
            audit.record_permission(resolved.clone());
        }
        let _ = self.events.send(PermissionEvent::Resolved(resolved));
        Ok(())
    }

    fn decision_of(&self, id: RequestId) -> Option<Decision> {
        self.requests
            .lock()
            .get(&id)
            .and_then(|slot| Decision::from_status(slot.request.status))
    }

    // ========================================================================
    // Query
    // ========================================================================

    pub fn get(&self, id: RequestId) -> Option<PermissionRequest> {
        self.requests.lock().get(&id).map(|slot| slot.request.clone())
    }

    /// PENDING 요청 (요청 시간 순)
    pub fn pending(&self) -> Vec<PermissionRequest> {
        let mut pending: Vec<PermissionRequest> = self
            .requests
            .lock()
            .values()
            .filter(|slot| !slot.request.status.is_resolved())
            .map(|slot| slot.request.clone())
            .collect();
        pending.sort_by_key(|r| r.requested_at);
        pending
    }

    /// 보관 중인 모든 요청 (요청 시간 순)
    pub fn all(&self) -> Vec<PermissionRequest> {
        let mut all: Vec<PermissionRequest> = self
            .requests
            .lock()
            .values()
            .map(|slot| slot.request.clone())
            .collect();
        all.sort_by_key(|r| r.requested_at);
        all
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(SecurityMode::default())
    }
}

struct PendingGuard<'a> {
    manager: &'a PermissionManager,
    id: RequestId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.manager.resolve(
                self.id,
                RequestStatus::Denied,
                Some("abandoned"),
                Decision::Cancelled,
            );
        }
    }
}
