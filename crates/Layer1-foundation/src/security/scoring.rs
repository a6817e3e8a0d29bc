//! Risk Scoring Engine - 분석기 점수와 스캔 결과를 하나의 risk score 로 합산
//!
//! - 호출 단위: `score = min(100, weight_sum + suspicious 가중치)`,
//!   분류는 분석기 분류와 점수 분류 중 높은 쪽
//! - 태스크 단위: 보안 이벤트 누적 점수로 위협 수준 추적

use super::layer::ScanReport;
use super::risk::{MatchedPattern, RiskAssessment, RiskCategory, RiskThresholds};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const MAX_SCORE: u32 = 100;

/// 호출 단위 최종 점수
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScore {
    pub score: u32,
    pub category: RiskCategory,
    pub contributions: Vec<MatchedPattern>,
}

/// 태스크 단위 보안 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEvent {
    PromptInjection,
    Malware,
    Exfiltration,
    QuarantineHit,
    WorkspaceViolation,
    BlockedCommand,
    ShellCommand,
}

impl SecurityEvent {
    pub fn weight(&self) -> u32 {
        match self {
            Self::PromptInjection => 20,
            Self::Malware => 25,
            Self::Exfiltration => 25,
            Self::QuarantineHit => 15,
            Self::WorkspaceViolation => 15,
            Self::BlockedCommand => 20,
            Self::ShellCommand => 4,
        }
    }

    /// SecurityBlocked 의 stage 이름에서 이벤트 추론
    pub fn from_stage(stage: &str) -> Option<Self> {
        match stage {
            "prompt_injection" => Some(Self::PromptInjection),
            "malware" => Some(Self::Malware),
            "exfiltration" => Some(Self::Exfiltration),
            "quarantine" => Some(Self::QuarantineHit),
            _ => None,
        }
    }
}

/// 태스크 위협 수준
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Normal,
    /// >= 25
    Warning,
    /// >= 50
    Elevated,
    /// >= 100, 태스크 중단
    Critical,
}

impl ThreatLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 100 => Self::Critical,
            s if s >= 50 => Self::Elevated,
            s if s >= 25 => Self::Warning,
            _ => Self::Normal,
        }
    }
}

pub struct RiskScoringEngine {
    thresholds: RiskThresholds,
    tallies: Mutex<HashMap<String, u32>>,
}

impl RiskScoringEngine {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            tallies: Mutex::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// 분석기 평가 + 스캔 보고서 합산
    pub fn aggregate(&self, assessment: &RiskAssessment, report: &ScanReport) -> RiskScore {
        let mut contributions = assessment.matched_patterns.clone();
        contributions.extend(report.findings.iter().map(|f| MatchedPattern {
            reason: format!("{}: {}", f.stage, f.reason),
            weight: f.weight,
        }));

        let score = (assessment.weight_sum + report.suspicious_weight()).min(MAX_SCORE);
        let category = assessment.category.max(self.thresholds.classify(score));
        let score = if assessment.forced.is_some() {
            MAX_SCORE
        } else {
            score
        };

        RiskScore {
            score,
            category,
            contributions,
        }
    }

    /// 태스크 보안 이벤트 기록. 새 위협 수준 반환
    pub fn record_event(&self, task_id: &str, event: SecurityEvent) -> ThreatLevel {
        let mut tallies = self.tallies.lock();
        let total = tallies.entry(task_id.to_string()).or_insert(0);
        let before = ThreatLevel::from_score(*total);
        *total = total.saturating_add(event.weight());
        let after = ThreatLevel::from_score(*total);

        if after > before && after >= ThreatLevel::Warning {
            warn!(task_id, ?event, score = *total, level = ?after, "Task threat level raised");
        }
        after
    }

    pub fn threat_score(&self, task_id: &str) -> u32 {
        self.tallies.lock().get(task_id).copied().unwrap_or(0)
    }

    pub fn threat_level(&self, task_id: &str) -> ThreatLevel {
        ThreatLevel::from_score(self.threat_score(task_id))
    }

    pub fn reset(&self, task_id: &str) {
        self.tallies.lock().remove(task_id);
    }

    /// 집계 중인 태스크 수
    pub fn tracked_tasks(&self) -> usize {
        self.tallies.lock().len()
    }
}

impl Default for RiskScoringEngine {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::layer::ScanFinding;

    fn assessment(weight: u32) -> RiskAssessment {
        let t = RiskThresholds::default();
        RiskAssessment {
            subject: "cmd".into(),
            matched_patterns: vec![MatchedPattern {
                reason: "x".into(),
                weight,
            }],
            weight_sum: weight,
            category: t.classify(weight),
            forced: None,
        }
    }

    #[test]
    fn test_aggregate_adds_suspicious_weight() {
        let engine = RiskScoringEngine::default();
        let report = ScanReport {
            findings: vec![ScanFinding {
                stage: "exfiltration".into(),
                reason: "secret environment variable reference".into(),
                weight: 15,
            }],
            stages_run: vec!["prompt_injection", "malware", "exfiltration"],
        };

        let score = engine.aggregate(&assessment(40), &report);
        assert_eq!(score.score, 55);
        assert_eq!(score.category, RiskCategory::Dangerous);
        assert_eq!(score.contributions.len(), 2);
    }

    #[test]
    fn test_aggregate_caps_and_keeps_forced_category() {
        let engine = RiskScoringEngine::default();
        let mut forced = RiskAssessment::safe("rm -rf /");
        forced.category = RiskCategory::Blocked;
        forced.forced = Some("always blocked".into());

        let score = engine.aggregate(&forced, &ScanReport::default());
        assert_eq!(score.score, 100);
        assert_eq!(score.category, RiskCategory::Blocked);

        let capped = engine.aggregate(&assessment(150), &ScanReport::default());
        assert_eq!(capped.score, 100);
    }

    #[test]
    fn test_threat_levels() {
        let engine = RiskScoringEngine::default();
        assert_eq!(engine.record_event("t1", SecurityEvent::ShellCommand), ThreatLevel::Normal);
        assert_eq!(engine.record_event("t1", SecurityEvent::Exfiltration), ThreatLevel::Warning);
        assert_eq!(engine.record_event("t1", SecurityEvent::Exfiltration), ThreatLevel::Elevated);
        engine.record_event("t1", SecurityEvent::Malware);
        assert_eq!(engine.record_event("t1", SecurityEvent::Malware), ThreatLevel::Critical);
        assert_eq!(engine.threat_level("t2"), ThreatLevel::Normal);

        assert_eq!(engine.tracked_tasks(), 1);
        engine.reset("t1");
        assert_eq!(engine.threat_score("t1"), 0);
        assert_eq!(engine.tracked_tasks(), 0);
    }

    #[test]
    fn test_event_from_stage() {
        assert_eq!(SecurityEvent::from_stage("malware"), Some(SecurityEvent::Malware));
        assert_eq!(SecurityEvent::from_stage("risk"), None);
    }
}
