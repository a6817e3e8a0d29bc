//! Audit Log - append-only 감사 로그
//!
//! 메모리 링 버퍼 + 선택적 JSON Lines 파일 싱크로 기록합니다.
//! 외부 모니터링은 `subscribe()` 또는 `entries()`로 읽기만 할 수 있습니다.

use super::types::{AuditEntry, AuditKind, AuditQuery, AuditRecord, ToolCallRecord};
use crate::permission::PermissionRequest;
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 감사 로그 파일명
pub const AUDIT_LOG_FILE: &str = "audit.jsonl";

const DEFAULT_MAX_IN_MEMORY: usize = 10_000;
const SUBSCRIBER_CAPACITY: usize = 256;

// ============================================================================
// AuditLog
// ============================================================================

struct AuditInner {
    entries: VecDeque<AuditEntry>,
    next_seq: u64,
    sink: Option<File>,
}

/// append-only 감사 로그
pub struct AuditLog {
    inner: Mutex<AuditInner>,
    max_in_memory: usize,
    sink_path: Option<PathBuf>,
    tx: broadcast::Sender<AuditEntry>,
}

impl AuditLog {
    /// 메모리 전용 로그
    pub fn in_memory() -> Self {
        Self::with_capacity(DEFAULT_MAX_IN_MEMORY)
    }

    pub fn with_capacity(max_in_memory: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            inner: Mutex::new(AuditInner {
                entries: VecDeque::new(),
                next_seq: 1,
                sink: None,
            }),
            max_in_memory: max_in_memory.max(1),
            sink_path: None,
            tx,
        }
    }

    /// JSONL 파일 싱크 사용 (기존 파일 뒤에 이어서 기록)
    pub fn with_file(path: impl Into<PathBuf>, max_in_memory: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // 순번은 기존 파일의 마지막 엔트리부터 이어감
        let next_seq = Self::read_file(&path)
            .ok()
            .and_then(|entries| entries.last().map(|e| e.seq + 1))
            .unwrap_or(1);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let log = Self::with_capacity(max_in_memory);
        {
            let mut inner = log.inner.lock();
            inner.sink = Some(file);
            inner.next_seq = next_seq;
        }

        info!(path = %path.display(), next_seq, "Audit log opened");

        Ok(Self {
            sink_path: Some(path),
            ..log
        })
    }

    pub fn sink_path(&self) -> Option<&Path> {
        self.sink_path.as_deref()
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// 레코드 추가 후 순번 반환
    pub fn append(&self, record: AuditRecord) -> u64 {
        let entry = {
            let mut inner = self.inner.lock();
            let entry = AuditEntry {
                seq: inner.next_seq,
                recorded_at: Utc::now(),
                record,
            };
            inner.next_seq += 1;

            if let Some(file) = inner.sink.as_mut() {
                if let Err(e) = write_line(file, &entry) {
                    // 파일 기록 실패는 메모리 로그를 막지 않음
                    warn!(seq = entry.seq, error = %e, "Failed to write audit entry");
                }
            }

            inner.entries.push_back(entry.clone());
            while inner.entries.len() > self.max_in_memory {
                inner.entries.pop_front();
            }
            entry
        };

        debug!(seq = entry.seq, kind = ?entry.record.kind(), "Audit entry appended");
        // 구독자가 없으면 에러지만 무시
        let _ = self.tx.send(entry.clone());
        entry.seq
    }

    pub fn record_tool_call(&self, record: ToolCallRecord) -> u64 {
        self.append(AuditRecord::ToolCall(record))
    }

    pub fn record_permission(&self, request: PermissionRequest) -> u64 {
        self.append(AuditRecord::PermissionResolved(request))
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// 실시간 구독
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.tx.subscribe()
    }

    /// 메모리에 남아있는 모든 엔트리
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let iter = inner.entries.iter().filter(|e| query.matches(e)).cloned();
        match query.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// 도구 호출 기록만
    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|e| match &e.record {
                AuditRecord::ToolCall(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// 승인 요청 해결 기록만
    pub fn permission_resolutions(&self) -> Vec<PermissionRequest> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|e| match &e.record {
                AuditRecord::PermissionResolved(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.record.kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 다음에 부여될 순번
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// JSONL 파일 읽기 (손상된 줄은 건너뜀)
    pub fn read_file(path: &Path) -> Result<Vec<AuditEntry>> {
        let file = File::open(path)
            .map_err(|e| Error::Persistence(format!("Failed to open {}: {}", path.display(), e)))?;
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = idx + 1, error = %e, "Skipping corrupt audit line"),
            }
        }
        Ok(entries)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn write_line(file: &mut File, entry: &AuditEntry) -> Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{CallOutcome, SecurityVerdict};
    use crate::audit::AuditId;

    fn record(tool: &str, task: &str) -> ToolCallRecord {
        ToolCallRecord {
            id: AuditId::new(),
            task_id: Some(task.to_string()),
            tool_name: tool.to_string(),
            args: serde_json::json!({ "path": "a.txt" }),
            security_verdict: SecurityVerdict::Pass,
            risk_score: 0,
            risk_category: Some("SAFE".to_string()),
            outcome: CallOutcome::Success,
            duration_ms: 3,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_append_assigns_sequence() {
        let log = AuditLog::in_memory();
        assert_eq!(log.append(AuditRecord::ToolCall(record("read_file", "t1"))), 1);
        assert_eq!(
            log.append(AuditRecord::Quarantined {
                subject: "run_command:curl".into(),
                reason: "exfiltration".into()
            }),
            2
        );
        assert_eq!(log.len(), 2);
        assert_eq!(log.tool_calls().len(), 1);
        assert_eq!(log.count(AuditKind::Quarantined), 1);
    }

    #[test]
    fn test_ring_buffer_bound() {
        let log = AuditLog::with_capacity(2);
        for _ in 0..5 {
            log.record_tool_call(record("read_file", "t1"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 4);
        assert_eq!(log.next_seq(), 6);
    }

    #[test]
    fn test_query_filters() {
        let log = AuditLog::in_memory();
        log.record_tool_call(record("read_file", "t1"));
        log.record_tool_call(record("write_file", "t2"));
        log.record_tool_call(record("read_file", "t2"));

        let by_task = log.query(&AuditQuery::new().with_task("t2"));
        assert_eq!(by_task.len(), 2);

        let by_tool = log.query(&AuditQuery::new().with_tool("read_file").with_limit(1));
        assert_eq!(by_tool.len(), 1);
        assert_eq!(by_tool[0].seq, 1);

        let since = log.query(&AuditQuery::new().since(3));
        assert_eq!(since.len(), 1);
    }

    #[test]
    fn test_file_sink_roundtrip_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUDIT_LOG_FILE);

        {
            let log = AuditLog::with_file(&path, 100).unwrap();
            log.record_tool_call(record("read_file", "t1"));
            log.append(AuditRecord::KillSwitch {
                engaged: true,
                tasks_cancelled: 3,
            });
        }

        let entries = AuditLog::read_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[1].record,
            AuditRecord::KillSwitch { tasks_cancelled: 3, .. }
        ));

        // 다시 열면 순번이 이어짐
        let log = AuditLog::with_file(&path, 100).unwrap();
        assert_eq!(log.next_seq(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_receives_entries() {
        let log = AuditLog::in_memory();
        let mut rx = log.subscribe();
        log.record_tool_call(record("read_file", "t1"));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.seq, 1);
    }
}
