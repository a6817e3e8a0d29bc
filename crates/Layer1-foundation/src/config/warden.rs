//! Warden Config - 통합 설정
//!
//! 글로벌 (`~/.config/warden/config.json`) 과 프로젝트 (`.warden/config.json`)
//! 설정을 키 단위로 병합합니다. 프로젝트 설정이 우선합니다.

use crate::permission::{PermissionPolicy, PolicyOverride, SecurityMode};
use crate::security::RiskThresholds;
use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const WARDEN_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Warden Config (통합)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardenConfig {
    /// 파일 작업이 허용되는 루트
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// 태스크 기록, audit.jsonl, quarantine.json 위치
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub tasks: TaskConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            data_dir: default_data_dir(),
            security: SecurityConfig::default(),
            tasks: TaskConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WardenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 워크스페이스 기준 설정 (data_dir = `<root>/.warden`)
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            data_dir: workspace_root.join(".warden"),
            workspace_root,
            ..Self::default()
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut merged = Value::Object(Default::default());

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(value) = global.load_optional::<Value>(WARDEN_CONFIG_FILE)? {
                merge_values(&mut merged, value);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(value) = project.load_optional::<Value>(WARDEN_CONFIG_FILE)? {
                merge_values(&mut merged, value);
            }
        }

        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 단일 파일 로드 (`.json` 또는 `.toml`)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            Some("json") | None => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "unsupported config format: .{}",
                    other
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        let store = JsonStore::current_project()?;
        store.save_atomic(WARDEN_CONFIG_FILE, self)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    pub fn validate(&self) -> Result<()> {
        if self.tasks.worker_concurrency == 0 {
            return Err(Error::Config("tasks.workerConcurrency must be > 0".into()));
        }
        if !self.security.risk_thresholds.is_valid() {
            return Err(Error::Config(
                "security.riskThresholds must be strictly increasing".into(),
            ));
        }
        if self.security.permission_timeout_secs == 0 {
            return Err(Error::Config(
                "security.permissionTimeoutSecs must be > 0".into(),
            ));
        }
        if self.tasks.watchdog_interval_secs <= self.security.permission_timeout_secs {
            return Err(Error::Config(format!(
                "tasks.watchdogIntervalSecs ({}) must exceed security.permissionTimeoutSecs ({})",
                self.tasks.watchdog_interval_secs, self.security.permission_timeout_secs
            )));
        }
        if self.tasks.max_log_entries == 0 {
            return Err(Error::Config("tasks.maxLogEntries must be > 0".into()));
        }
        Ok(())
    }

    /// 모드 기본값 + override 를 적용한 정책
    pub fn permission_policy(&self) -> PermissionPolicy {
        PermissionPolicy::default().with_overrides(&self.security.policy_overrides)
    }
}

/// `overlay` 의 키가 `base` 를 덮어씀 (객체는 재귀 병합)
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// Security Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(default)]
    pub mode: SecurityMode,

    #[serde(default)]
    pub risk_thresholds: RiskThresholds,

    /// 승인 대기 시간 (초)
    #[serde(default = "default_permission_timeout")]
    pub permission_timeout_secs: u64,

    #[serde(default)]
    pub policy_overrides: Vec<PolicyOverride>,

    /// 악성 판정된 파일을 `.quarantine/` 으로 이동
    #[serde(default)]
    pub isolate_flagged_files: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: SecurityMode::default(),
            risk_thresholds: RiskThresholds::default(),
            permission_timeout_secs: default_permission_timeout(),
            policy_overrides: Vec::new(),
            isolate_flagged_files: false,
        }
    }
}

impl SecurityConfig {
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_timeout_secs)
    }
}

// ============================================================================
// Task Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// 동시에 RUNNING 일 수 있는 태스크 수
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// 진행 없이 이 시간이 지나면 FAILED
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    #[serde(default = "default_kill_switch_budget")]
    pub kill_switch_budget_ms: u64,

    /// 태스크별 로그 최대 개수
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,

    /// PermissionDenied / ToolNotFound 에서 FAILED 대신 PAUSED
    #[serde(default = "default_true")]
    pub pause_on_recoverable: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            watchdog_interval_secs: default_watchdog_interval(),
            kill_switch_budget_ms: default_kill_switch_budget(),
            max_log_entries: default_max_log_entries(),
            pause_on_recoverable: true,
        }
    }
}

impl TaskConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn kill_switch_budget(&self) -> Duration {
        Duration::from_millis(self.kill_switch_budget_ms)
    }
}

// ============================================================================
// Audit / Logging Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// `<dataDir>/audit.jsonl` 에 기록
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default = "default_max_in_memory")]
    pub max_in_memory: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: true,
            max_in_memory: default_max_in_memory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `RUST_LOG` 가 없을 때 사용하는 필터
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 로그에 모듈 경로 표시
    #[serde(default)]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_workspace_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("warden"))
        .unwrap_or_else(|| PathBuf::from(".warden"))
}

fn default_permission_timeout() -> u64 {
    120
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_watchdog_interval() -> u64 {
    300
}

fn default_kill_switch_budget() -> u64 {
    2000
}

fn default_max_log_entries() -> usize {
    1000
}

fn default_max_in_memory() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionCategory, PolicyDecision};
    use serde_json::json;

    #[test]
    fn test_warden_config_default() {
        let config = WardenConfig::default();
        assert_eq!(config.security.mode, SecurityMode::Developer);
        assert_eq!(config.security.permission_timeout_secs, 120);
        assert_eq!(config.tasks.worker_concurrency, 4);
        assert_eq!(config.tasks.kill_switch_budget(), Duration::from_millis(2000));
        assert!(config.tasks.pause_on_recoverable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WardenConfig = serde_json::from_value(json!({
            "security": { "mode": "admin" },
            "tasks": { "workerConcurrency": 8 }
        }))
        .unwrap();

        assert_eq!(config.security.mode, SecurityMode::Admin);
        assert_eq!(config.security.risk_thresholds, RiskThresholds::default());
        assert_eq!(config.tasks.worker_concurrency, 8);
        assert_eq!(config.tasks.watchdog_interval_secs, 300);
    }

    #[test]
    fn test_merge_values_overlay_wins() {
        let mut base = json!({ "security": { "mode": "observer", "permissionTimeoutSecs": 60 } });
        merge_values(&mut base, json!({ "security": { "mode": "admin" } }));

        assert_eq!(base["security"]["mode"], "admin");
        assert_eq!(base["security"]["permissionTimeoutSecs"], 60);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WardenConfig::default();
        config.tasks.worker_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.tasks.watchdog_interval_secs = 60;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.security.risk_thresholds = RiskThresholds {
            caution: 50,
            dangerous: 20,
            blocked: 80,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("warden.json");
        std::fs::write(
            &json_path,
            r#"{ "security": { "policyOverrides": [
                { "mode": "developer", "category": "shell_exec", "policy": "AUTO_APPROVE" }
            ] } }"#,
        )
        .unwrap();
        let config = WardenConfig::from_file(&json_path).unwrap();
        assert_eq!(
            config
                .permission_policy()
                .decide(SecurityMode::Developer, PermissionCategory::ShellExec),
            PolicyDecision::AutoApprove
        );

        let toml_path = dir.path().join("warden.toml");
        std::fs::write(
            &toml_path,
            "[security]\nmode = \"observer\"\n\n[tasks]\nkillSwitchBudgetMs = 500\n",
        )
        .unwrap();
        let config = WardenConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.security.mode, SecurityMode::Observer);
        assert_eq!(config.tasks.kill_switch_budget_ms, 500);

        let bad = dir.path().join("warden.yaml");
        std::fs::write(&bad, "x: 1").unwrap();
        assert!(matches!(WardenConfig::from_file(&bad), Err(Error::Config(_))));
    }
}
