//! Security system for Warden
//!
//! - `path`: 워크스페이스 경계, 위험 확장자, 민감 경로
//! - `risk`: CommandRiskAnalyzer (가중치 패턴 → SAFE/CAUTION/DANGEROUS/BLOCKED)
//! - `stages`: 스캔 단계 (prompt injection, malware, exfiltration)
//! - `quarantine`: 격리 목록
//! - `layer`: SecurityLayer (격리 확인 + 단계 실행)
//! - `scoring`: RiskScoringEngine (호출 점수 + 태스크 위협 수준)
//! - `redact`: 감사 기록용 시크릿 마스킹

mod layer;
mod path;
mod quarantine;
mod redact;
mod risk;
mod scoring;
mod stages;

pub use layer::{ScanFinding, ScanReport, SecurityLayer, QUARANTINE_STAGE};
pub use path::{
    dangerous_extension, lexical_normalize, sensitive_file_patterns, SensitivePath,
    WorkspaceBoundary, DANGEROUS_EXTENSIONS,
};
pub use quarantine::{IsolatedFile, QuarantineEntry, QuarantineSystem, ISOLATION_DIR, QUARANTINE_FILE};
pub use redact::{is_secret_key, redact_args, redact_text, REDACTED};
pub use risk::{
    CommandRiskAnalyzer, FileOperation, MatchedPattern, RiskAssessment, RiskCategory, RiskSubject,
    RiskThresholds,
};
pub use scoring::{RiskScore, RiskScoringEngine, SecurityEvent, ThreatLevel};
pub use stages::{
    default_stages, DataExfiltrationPrevention, MalwareDefenseLayer, PromptInjectionProtector,
    ScanDirection, ScanInput, ScanStage, StageVerdict, DEFAULT_MAX_SCAN_BYTES,
};
