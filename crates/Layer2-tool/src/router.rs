//! Tool Router - the single choke point for every tool invocation
//!
//! Every call runs the same ordered pipeline:
//!
//! ```text
//! kill switch ─► lookup ─► input gate ─► risk ─► permission ─► path locks
//!                                                                  │
//!       ToolCallRecord ◄── output gate ◄── handler (catch_unwind) ◄┘
//! ```
//!
//! Exactly one [`ToolCallRecord`] is appended per call that gets past the
//! kill-switch check, whatever the outcome.

use crate::lock::PathLocks;
use crate::{RegisteredTool, Tool, ToolContext, ToolDef, ToolRegistry, ToolResult};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use warden_foundation::{
    redact_args, AuditId, AuditLog, CallOutcome, CommandRiskAnalyzer, Decision, Error,
    FileOperation, KillSwitch, PermissionAsk, PermissionCategory, PermissionManager,
    PermissionPolicy, PolicyDecision, QuarantineSystem, Result, RiskCategory, RiskScore,
    RiskScoringEngine, RiskSubject, RiskThresholds, ScanStage, SecurityEvent, SecurityLayer,
    SecurityMode, SecurityVerdict, ThreatLevel, ToolCallRecord, WardenConfig, WorkspaceBoundary,
    AUDIT_LOG_FILE, DEFAULT_PERMISSION_TIMEOUT,
};

const RISK_STAGE: &str = "risk";
const MALWARE_STAGE: &str = "malware";

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Owning task (recorded, and used for threat tallies)
    pub task_id: Option<String>,
    /// Cancels the call; the kill switch cancels it regardless
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn for_task(task_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            task_id: Some(task_id.into()),
            cancel: Some(cancel),
        }
    }
}

/// What the pipeline learned about a call before it ended
struct CallTrace {
    verdict: SecurityVerdict,
    risk_score: u32,
    category: Option<RiskCategory>,
}

impl Default for CallTrace {
    fn default() -> Self {
        Self {
            verdict: SecurityVerdict::NotScanned,
            risk_score: 0,
            category: None,
        }
    }
}

/// Decrements the in-flight count when a call finishes (after its record)
struct InFlight<'a> {
    count: &'a AtomicUsize,
    idle: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, idle: &'a Notify) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count, idle }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct ToolRouterBuilder {
    workspace_root: PathBuf,
    registry: ToolRegistry,
    mode: SecurityMode,
    thresholds: RiskThresholds,
    permission_timeout: Duration,
    policy: Option<PermissionPolicy>,
    audit: Option<Arc<AuditLog>>,
    quarantine: Option<Arc<QuarantineSystem>>,
    stages: Option<Vec<Box<dyn ScanStage>>>,
    permissions: Option<Arc<PermissionManager>>,
    kill_switch: Option<Arc<KillSwitch>>,
    isolate_flagged_files: bool,
}

impl ToolRouterBuilder {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            registry: ToolRegistry::new(),
            mode: SecurityMode::default(),
            thresholds: RiskThresholds::default(),
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            policy: None,
            audit: None,
            quarantine: None,
            stages: None,
            permissions: None,
            kill_switch: None,
            isolate_flagged_files: false,
        }
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn mode(mut self, mode: SecurityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Ignored when a PermissionManager is supplied
    pub fn permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout = timeout;
        self
    }

    /// Ignored when a PermissionManager is supplied
    pub fn policy(mut self, policy: PermissionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn quarantine(mut self, quarantine: Arc<QuarantineSystem>) -> Self {
        self.quarantine = Some(quarantine);
        self
    }

    /// Replace the default scan stages (run in the given order)
    pub fn stages(mut self, stages: Vec<Box<dyn ScanStage>>) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn kill_switch(mut self, kill_switch: Arc<KillSwitch>) -> Self {
        self.kill_switch = Some(kill_switch);
        self
    }

    pub fn isolate_flagged_files(mut self, enabled: bool) -> Self {
        self.isolate_flagged_files = enabled;
        self
    }

    pub fn build(self) -> ToolRouter {
        let audit = self.audit.unwrap_or_else(|| Arc::new(AuditLog::in_memory()));
        let quarantine = self
            .quarantine
            .unwrap_or_else(|| Arc::new(QuarantineSystem::new().with_audit(audit.clone())));
        let security = match self.stages {
            Some(stages) => SecurityLayer::with_stages(stages, quarantine),
            None => SecurityLayer::new(quarantine),
        };
        let permissions = self.permissions.unwrap_or_else(|| {
            Arc::new(
                PermissionManager::new(self.mode)
                    .with_policy(self.policy.unwrap_or_default())
                    .with_default_timeout(self.permission_timeout)
                    .with_audit(audit.clone()),
            )
        });

        ToolRouter {
            workspace: Arc::new(WorkspaceBoundary::new(&self.workspace_root)),
            registry: RwLock::new(self.registry),
            analyzer: CommandRiskAnalyzer::new(&self.workspace_root)
                .with_thresholds(self.thresholds),
            scoring: Arc::new(RiskScoringEngine::new(self.thresholds)),
            security: Arc::new(security),
            permissions,
            audit,
            kill_switch: self.kill_switch.unwrap_or_default(),
            locks: PathLocks::new(),
            isolate_flagged_files: self.isolate_flagged_files,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }
}

// ============================================================================
// ToolRouter
// ============================================================================

pub struct ToolRouter {
    workspace: Arc<WorkspaceBoundary>,
    registry: RwLock<ToolRegistry>,
    analyzer: CommandRiskAnalyzer,
    scoring: Arc<RiskScoringEngine>,
    security: Arc<SecurityLayer>,
    permissions: Arc<PermissionManager>,
    audit: Arc<AuditLog>,
    kill_switch: Arc<KillSwitch>,
    locks: PathLocks,
    isolate_flagged_files: bool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl ToolRouter {
    pub fn builder(workspace_root: impl Into<PathBuf>) -> ToolRouterBuilder {
        ToolRouterBuilder::new(workspace_root)
    }

    /// Router wired from configuration: persistent audit log and quarantine set
    /// under `data_dir`, policy overrides and thresholds applied.
    pub fn from_config(config: &WardenConfig, registry: ToolRegistry) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(if config.audit.persist {
            AuditLog::with_file(config.data_dir.join(AUDIT_LOG_FILE), config.audit.max_in_memory)?
        } else {
            AuditLog::with_capacity(config.audit.max_in_memory)
        });
        let quarantine = Arc::new(QuarantineSystem::persistent(&config.data_dir)?.with_audit(audit.clone()));

        Ok(Self::builder(&config.workspace_root)
            .registry(registry)
            .mode(config.security.mode)
            .thresholds(config.security.risk_thresholds)
            .permission_timeout(config.security.permission_timeout())
            .policy(config.permission_policy())
            .audit(audit)
            .quarantine(quarantine)
            .isolate_flagged_files(config.security.isolate_flagged_files)
            .build())
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        category: PermissionCategory,
        min_mode: SecurityMode,
    ) -> Result<()> {
        self.registry.write().register(tool, category, min_mode)
    }

    pub fn disable_tool(&self, name: &str) {
        self.registry.write().disable(name);
    }

    pub fn enable_tool(&self, name: &str) {
        self.registry.write().enable(name);
    }

    /// Tools visible in the current SecurityMode
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.registry.read().visible_for(self.permissions.mode())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn workspace(&self) -> &Arc<WorkspaceBoundary> {
        &self.workspace
    }

    pub fn analyzer(&self) -> &CommandRiskAnalyzer {
        &self.analyzer
    }

    pub fn scoring(&self) -> &Arc<RiskScoringEngine> {
        &self.scoring
    }

    pub fn security(&self) -> &Arc<SecurityLayer> {
        &self.security
    }

    pub fn quarantine(&self) -> &Arc<QuarantineSystem> {
        self.security.quarantine()
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn mode(&self) -> SecurityMode {
        self.permissions.mode()
    }

    pub fn set_mode(&self, mode: SecurityMode) {
        self.permissions.set_mode(mode);
    }

    /// Calls that have passed the kill-switch check and not yet been recorded
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no call is in flight; false if `budget` ran out first
    pub async fn drain(&self, budget: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    // ========================================================================
    // Call
    // ========================================================================

    pub async fn call(&self, name: &str, args: Value) -> Result<ToolResult> {
        self.call_with(name, args, CallOptions::default()).await
    }

    pub async fn call_with(&self, name: &str, args: Value, opts: CallOptions) -> Result<ToolResult> {
        // Counted before the check so a concurrent drain cannot miss this call
        let _in_flight = InFlight::enter(&self.in_flight, &self.idle);
        self.kill_switch.check()?;

        let started = Instant::now();
        let (cancel, _link) = self.link_cancel(opts.cancel.clone());
        let mut trace = CallTrace::default();

        let result = self
            .run_pipeline(name, &args, opts.task_id.as_deref(), &cancel, &mut trace)
            .await;

        self.record(name, &args, opts.task_id, trace, &result, started.elapsed());
        result
    }

    /// One token that fires on the caller's cancel or the kill switch
    fn link_cancel(&self, cancel: Option<CancellationToken>) -> (CancellationToken, Option<DropGuard>) {
        let kill = self.kill_switch.child_token();
        let Some(cancel) = cancel else {
            return (kill, None);
        };

        let linked = CancellationToken::new();
        let watch = linked.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = kill.cancelled() => {}
                _ = watch.cancelled() => {}
            }
            watch.cancel();
        });
        (linked.clone(), Some(linked.drop_guard()))
    }

    async fn run_pipeline(
        &self,
        name: &str,
        args: &Value,
        task_id: Option<&str>,
        cancel: &CancellationToken,
        trace: &mut CallTrace,
    ) -> Result<ToolResult> {
        // 1. lookup
        let registered = self.registry.read().lookup(name, self.permissions.mode())?;
        let tool = registered.tool.clone();
        let subject = tool.risk_subject(args);
        let key = self.subject_key(name, &subject, args);

        // 2. input gate
        let report = match self.security.check_input(&key, &tool.scan_text(args)) {
            Ok(report) => report,
            Err(e) => return Err(self.flagged(trace, task_id, e)),
        };
        trace.verdict = SecurityVerdict::Pass;

        // 3. risk
        let assessment = self.analyzer.analyze(&subject);
        let score = self.scoring.aggregate(&assessment, &report);
        trace.risk_score = score.score;
        trace.category = Some(score.category);

        if matches!(subject, RiskSubject::Command(_)) {
            self.note_event(task_id, SecurityEvent::ShellCommand);
        }
        if score.category == RiskCategory::Blocked {
            let reason = blocked_reason(&assessment.summary(), &score);
            warn!(tool = name, subject = %key, %reason, "Tool call blocked by risk assessment");
            self.security
                .quarantine_subject(&key, &format!("{}: {}", RISK_STAGE, reason));
            let event = match subject {
                RiskSubject::Command(_) => SecurityEvent::BlockedCommand,
                _ => SecurityEvent::WorkspaceViolation,
            };
            self.note_event(task_id, event);
            return Err(self.flagged(trace, task_id, Error::security_blocked(RISK_STAGE, reason)));
        }

        // 4. permission
        self.authorize(name, &registered, &score, &key, task_id, cancel)
            .await?;

        // 5. path locks
        let paths = self.mutated_paths(&subject);
        let _locks = if paths.is_empty() {
            None
        } else {
            Some(self.locks.acquire(paths, cancel).await?)
        };

        // 6. handler
        let mut ctx = ToolContext::new(self.workspace.clone(), cancel.clone());
        if let Some(id) = task_id {
            ctx = ctx.with_task(id);
        }
        let result = self.execute(name, tool.as_ref(), &ctx, args.clone()).await?;

        // 7. output gate
        if let Err(e) = self.security.check_output(&key, &result.content) {
            if let Error::SecurityBlocked { stage, reason } = &e {
                if stage == MALWARE_STAGE && self.isolate_flagged_files {
                    self.isolate(&subject, reason);
                }
            }
            return Err(self.flagged(trace, task_id, e));
        }

        Ok(result)
    }

    async fn authorize(
        &self,
        name: &str,
        registered: &RegisteredTool,
        score: &RiskScore,
        key: &str,
        task_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let category = registered.category;

        if score.category < RiskCategory::Dangerous {
            if self.permissions.policy_for(category) == PolicyDecision::AlwaysDeny {
                return Err(Error::PermissionDenied(format!(
                    "{} is not allowed in {} mode",
                    category,
                    self.permissions.mode().as_str()
                )));
            }
            return Ok(());
        }

        let ask = PermissionAsk::new(task_id.unwrap_or("-"), category, score.score)
            .with_detail(format!("{}: {}", name, key));
        match self.permissions.request_and_wait(ask, cancel).await {
            Decision::Approved => Ok(()),
            Decision::Denied => Err(Error::PermissionDenied(format!("{} denied for {}", category, name))),
            Decision::Expired => Err(Error::PermissionDenied(format!(
                "approval for {} expired",
                name
            ))),
            Decision::Cancelled => Err(Error::Cancelled),
        }
    }

    async fn execute(
        &self,
        name: &str,
        tool: &dyn Tool,
        ctx: &ToolContext,
        args: Value,
    ) -> Result<ToolResult> {
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            outcome = AssertUnwindSafe(tool.execute(ctx, args)).catch_unwind() => outcome,
        };

        match outcome {
            Ok(Ok(result)) if result.success => Ok(result),
            Ok(Ok(result)) => Err(Error::tool_execution(
                name,
                result
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            )),
            Ok(Err(e)) => Err(match e {
                Error::Cancelled | Error::SecurityBlocked { .. } => e,
                other => Error::tool_execution(name, other.to_string()),
            }),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tool = name, %message, "Tool handler panicked");
                Err(Error::tool_execution(name, format!("handler panicked: {}", message)))
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Quarantine key for a call
    ///
    /// Commands are keyed by their normalized form, files by resolved path, so
    /// quoting or `./` variations of a flagged subject still hit the quarantine.
    fn subject_key(&self, name: &str, subject: &RiskSubject, args: &Value) -> String {
        let file_key = |path: &str| {
            self.workspace
                .resolve(path)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| path.to_string())
        };

        match subject {
            RiskSubject::Command(cmd) => format!("command:{}", CommandRiskAnalyzer::normalize(cmd)),
            RiskSubject::File { path, .. } => file_key(path),
            RiskSubject::Files(files) => files
                .iter()
                .map(|(p, _)| file_key(p))
                .collect::<Vec<_>>()
                .join(" -> "),
            RiskSubject::None => format!("{}:{}", name, redact_args(args)),
        }
    }

    fn mutated_paths(&self, subject: &RiskSubject) -> Vec<PathBuf> {
        let files: Vec<(&str, FileOperation)> = match subject {
            RiskSubject::File { path, op } => vec![(path.as_str(), *op)],
            RiskSubject::Files(files) => files.iter().map(|(p, op)| (p.as_str(), *op)).collect(),
            _ => Vec::new(),
        };
        files
            .into_iter()
            .filter(|(_, op)| op.mutates())
            .filter_map(|(p, _)| self.workspace.resolve(p))
            .collect()
    }

    fn isolate(&self, subject: &RiskSubject, reason: &str) {
        let RiskSubject::File {
            path,
            op: FileOperation::Read,
        } = subject
        else {
            return;
        };
        let Some(resolved) = self.workspace.resolve(path) else {
            return;
        };
        if let Err(e) = self
            .quarantine()
            .isolate_file(self.workspace.root(), &resolved, reason)
        {
            warn!(path = %resolved.display(), error = %e, "Failed to isolate flagged file");
        }
    }

    fn flagged(&self, trace: &mut CallTrace, task_id: Option<&str>, err: Error) -> Error {
        if let Error::SecurityBlocked { stage, reason } = &err {
            trace.verdict = SecurityVerdict::flagged(stage.as_str(), reason.as_str());
            if let Some(event) = SecurityEvent::from_stage(stage) {
                self.note_event(task_id, event);
            }
        }
        err
    }

    fn note_event(&self, task_id: Option<&str>, event: SecurityEvent) {
        let Some(task_id) = task_id else {
            return;
        };
        let level = self.scoring.record_event(task_id, event);
        if level >= ThreatLevel::Elevated {
            debug!(task_id, ?event, ?level, "Task threat level raised");
        }
    }

    fn record(
        &self,
        name: &str,
        args: &Value,
        task_id: Option<String>,
        trace: CallTrace,
        result: &Result<ToolResult>,
        elapsed: Duration,
    ) {
        let outcome = match result {
            Ok(_) => CallOutcome::Success,
            Err(e) => CallOutcome::from_error(e),
        };
        match result {
            Ok(_) => debug!(tool = name, risk_score = trace.risk_score, "Tool call succeeded"),
            Err(e) => info!(tool = name, error = %e, "Tool call failed"),
        }

        self.audit.record_tool_call(ToolCallRecord {
            id: AuditId::new(),
            task_id,
            tool_name: name.to_string(),
            args: redact_args(args),
            security_verdict: trace.verdict,
            risk_score: trace.risk_score,
            risk_category: trace.category.map(|c| c.as_str().to_string()),
            outcome,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

fn blocked_reason(summary: &str, score: &RiskScore) -> String {
    if score.contributions.is_empty() {
        return summary.to_string();
    }
    format!("{} (score {})", summary, score.score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_builtins;
    use serde_json::json;

    fn router(dir: &tempfile::TempDir, mode: SecurityMode) -> ToolRouter {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        ToolRouter::builder(dir.path())
            .registry(registry)
            .mode(mode)
            .build()
    }

    #[test]
    fn test_subject_keys() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, SecurityMode::Developer);

        let cmd = router.subject_key(
            "run_command",
            &RiskSubject::Command("LS  'a b'".into()),
            &json!({}),
        );
        assert_eq!(cmd, "command:ls a b");

        let file = router.subject_key(
            "read_file",
            &RiskSubject::File {
                path: "./src/../a.txt".into(),
                op: FileOperation::Read,
            },
            &json!({}),
        );
        assert_eq!(file, dir.path().join("a.txt").display().to_string());

        let other = router.subject_key("ping", &RiskSubject::None, &json!({ "token": "abc" }));
        assert!(other.starts_with("ping:"));
        assert!(!other.contains("abc"));
    }

    #[test]
    fn test_mutated_paths_skip_reads() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, SecurityMode::Developer);

        let subject = RiskSubject::Files(vec![
            ("a.txt".into(), FileOperation::Move),
            ("b.txt".into(), FileOperation::Write),
            ("c.txt".into(), FileOperation::Read),
        ]);
        assert_eq!(router.mutated_paths(&subject).len(), 2);
    }

    #[test]
    fn test_definitions_follow_mode() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, SecurityMode::Observer);
        assert_eq!(router.definitions().len(), 2);

        router.set_mode(SecurityMode::Admin);
        assert_eq!(router.definitions().len(), 8);
    }

    #[tokio::test]
    async fn test_drain_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, SecurityMode::Developer);
        assert!(router.drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_handler_failure_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir, SecurityMode::Developer);

        let err = router
            .call("read_file", json!({ "path": "missing.txt" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolExecution { .. }));

        let calls = router.audit().tool_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].security_verdict.is_pass());
        assert_eq!(calls[0].risk_category.as_deref(), Some("SAFE"));
    }
}
