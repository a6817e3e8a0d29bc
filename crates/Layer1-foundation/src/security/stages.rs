//! 스캔 단계 - 텍스트 시그니처 검사
//!
//! SecurityLayer 가 고정된 순서로 실행하는 검사기들:
//! 1. [`PromptInjectionProtector`]
//! 2. [`MalwareDefenseLayer`]
//! 3. [`DataExfiltrationPrevention`]
//!
//! 각 단계는 입력만 보고 판정합니다 (상태 없음).
//! 테스트에서는 [`ScanStage`] 를 직접 구현해서 호출 횟수를 셀 수 있습니다.

use super::risk::decode_base64_runs;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::error;

// ============================================================
// 공통 타입
// ============================================================

/// 스캔 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// 도구 인자, 사용자 입력
    Inbound,
    /// 도구 실행 결과
    Outbound,
}

/// 스캔 입력
#[derive(Debug, Clone, Copy)]
pub struct ScanInput<'a> {
    /// 격리 키 (경로, 명령어 시그니처)
    pub subject: &'a str,
    pub text: &'a str,
    pub direction: ScanDirection,
}

impl<'a> ScanInput<'a> {
    pub fn inbound(subject: &'a str, text: &'a str) -> Self {
        Self {
            subject,
            text,
            direction: ScanDirection::Inbound,
        }
    }

    pub fn outbound(subject: &'a str, text: &'a str) -> Self {
        Self {
            subject,
            text,
            direction: ScanDirection::Outbound,
        }
    }
}

/// 단계 판정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageVerdict {
    Clean,
    /// 차단하지 않지만 점수에 가산
    Suspicious { reason: String, weight: u32 },
    /// 차단 + 격리
    Flag { reason: String },
}

impl StageVerdict {
    pub fn is_flag(&self) -> bool {
        matches!(self, Self::Flag { .. })
    }

    fn flag(reason: impl Into<String>) -> Self {
        Self::Flag {
            reason: reason.into(),
        }
    }

    fn suspicious(reason: impl Into<String>, weight: u32) -> Self {
        Self::Suspicious {
            reason: reason.into(),
            weight,
        }
    }
}

/// 스캔 단계
pub trait ScanStage: Send + Sync {
    /// 단계 이름 (SecurityBlocked 의 stage 필드)
    fn name(&self) -> &'static str;

    fn scan(&self, input: &ScanInput<'_>) -> StageVerdict;
}

// ============================================================
// 패턴 집합
// ============================================================

struct PatternSet {
    patterns: Vec<(Regex, &'static str)>,
}

impl PatternSet {
    fn new(case_insensitive: bool, table: &[(&'static str, &'static str)]) -> Self {
        let patterns = table
            .iter()
            .filter_map(|(pattern, reason)| {
                match RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .multi_line(true)
                    .build()
                {
                    Ok(regex) => Some((regex, *reason)),
                    Err(e) => {
                        error!(pattern, error = %e, "Invalid scan pattern skipped");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    fn first_match(&self, text: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, reason)| *reason)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.patterns.len()
    }
}

// ============================================================
// 1. Prompt Injection
// ============================================================

const INJECTION_PATTERNS: &[(&str, &str)] = &[
    (
        r"\b(?:ignore|disregard|forget|override)\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|system|original)\s+(?:instructions|prompts?|rules|directives)",
        "instruction override",
    ),
    (
        r"\bforget\s+(?:everything|all)\s+(?:you|above|before)",
        "instruction override",
    ),
    (
        r"^\s*(?:system|assistant|developer)\s*:|<\|im_start\|>|<\|system\|>|\[/?inst\]|<</?sys>>",
        "role marker injection",
    ),
    (
        r"\byou\s+are\s+now\s+(?:a|an|in)\b|\bnew\s+instructions\s*:",
        "role swap",
    ),
    (
        r"\b(?:reveal|show|print|output|repeat|leak)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|hidden\s+instructions|initial\s+instructions)",
        "system prompt extraction",
    ),
    (
        r"\bjailbreak\b|\bdan\s+mode\b|\bdo\s+anything\s+now\b|\bdeveloper\s+mode\s+(?:enabled|on)\b",
        "jailbreak attempt",
    ),
    (
        r"\bdownload\s+and\s+(?:run|execute)\b",
        "download-and-execute instruction",
    ),
    (
        r"\b(?:steal|exfiltrate|leak|harvest)\s+(?:the\s+|all\s+)?(?:user'?s?\s+)?(?:credentials|passwords|api\s+keys|tokens|secrets)",
        "credential theft instruction",
    ),
    (
        r"\b(?:write|save|modify|delete)\b.{0,40}\b(?:outside|beyond)\s+(?:of\s+)?(?:the\s+)?workspace",
        "workspace escape instruction",
    ),
    (
        r"\b(?:disable|bypass|turn\s+off|ignore)\s+(?:the\s+|all\s+)?(?:security|safety|sandbox|guardrails|permission\s+checks)",
        "security bypass instruction",
    ),
];

const ROLEPLAY_PATTERNS: &[(&str, &str)] = &[(
    r"\bact\s+as\s+(?:a|an|if)\b|\bpretend\s+(?:to\s+be|you\s+are)\b",
    "role-play request",
)];

const ROLEPLAY_WEIGHT: u32 = 10;

/// 지시 덮어쓰기 / 역할 바꾸기 탐지 (입력, 도구 출력 모두)
pub struct PromptInjectionProtector {
    flags: PatternSet,
    roleplay: PatternSet,
}

impl PromptInjectionProtector {
    pub fn new() -> Self {
        Self {
            flags: PatternSet::new(true, INJECTION_PATTERNS),
            roleplay: PatternSet::new(true, ROLEPLAY_PATTERNS),
        }
    }
}

impl Default for PromptInjectionProtector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStage for PromptInjectionProtector {
    fn name(&self) -> &'static str {
        "prompt_injection"
    }

    fn scan(&self, input: &ScanInput<'_>) -> StageVerdict {
        if let Some(reason) = self.flags.first_match(input.text) {
            return StageVerdict::flag(reason);
        }
        if let Some(reason) = self.roleplay.first_match(input.text) {
            return StageVerdict::suspicious(reason, ROLEPLAY_WEIGHT);
        }
        StageVerdict::Clean
    }
}

// ============================================================
// 2. Malware
// ============================================================

const MALWARE_PATTERNS: &[(&str, &str)] = &[
    (r"eicar-standard-antivirus-test-file", "EICAR test signature"),
    (
        r"\beval\s*\(\s*(?:base64_decode|gzinflate|str_rot13|atob)\s*\(",
        "obfuscated eval payload",
    ),
    (
        r"\bexec\s*\(\s*(?:base64\.)?b64decode\s*\(|\bexec\s*\(\s*__import__\s*\(\s*['\x22]base64",
        "obfuscated exec payload",
    ),
    (
        r"/dev/tcp/\d|\bbash\s+-i\s+>&|\b(?:nc|ncat|netcat)\b[^\n]*\s-[a-z]*e\s+(?:/bin/)?(?:ba)?sh\b|\bsocat\b[^\n]*\bexec:",
        "reverse shell",
    ),
    (r"stratum\+tcp://|\bxmrig\b|\bcpuminer\b|\bminerd\b", "crypto miner"),
    (
        r"\b(?:curl|wget)\b[^|\n]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b",
        "remote script dropper",
    ),
    (
        r"\b(?:powershell|pwsh)(?:\.exe)?\b[^\n]*\s-(?:e|enc|encodedcommand)\s+[a-z0-9+/=]{20,}",
        "encoded PowerShell",
    ),
    (r"\bmimikatz\b|sekurlsa::|lsadump::", "credential dumping tool"),
    (r"(?:\\x[0-9a-f]{2}){16,}", "hex-encoded shellcode"),
    (
        r"this program cannot be run in dos mode",
        "embedded Windows executable",
    ),
];

/// 디코딩된 base64 에 포함되면 악성으로 보는 키워드
const DECODED_MALWARE_KEYWORDS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "bash -i",
    "/dev/tcp",
    "powershell",
    "invoke-expression",
    "eval(",
    "exec(",
    "| sh",
    "|sh",
    "| bash",
];

/// 기본 최대 스캔 크기 (초과분은 Suspicious)
pub const DEFAULT_MAX_SCAN_BYTES: usize = 4 * 1024 * 1024;

const OVERSIZED_WEIGHT: u32 = 10;

/// 알려진 악성 시그니처 / 난독화 휴리스틱
pub struct MalwareDefenseLayer {
    signatures: PatternSet,
    max_scan_bytes: usize,
}

impl MalwareDefenseLayer {
    pub fn new() -> Self {
        Self {
            signatures: PatternSet::new(true, MALWARE_PATTERNS),
            max_scan_bytes: DEFAULT_MAX_SCAN_BYTES,
        }
    }

    pub fn with_max_scan_bytes(mut self, max: usize) -> Self {
        self.max_scan_bytes = max;
        self
    }
}

impl Default for MalwareDefenseLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStage for MalwareDefenseLayer {
    fn name(&self) -> &'static str {
        "malware"
    }

    fn scan(&self, input: &ScanInput<'_>) -> StageVerdict {
        let text = input.text;
        if text.starts_with("\u{7f}ELF") {
            return StageVerdict::flag("embedded ELF executable");
        }

        let oversized = text.len() > self.max_scan_bytes;
        let window = if oversized {
            let mut end = self.max_scan_bytes;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        if let Some(reason) = self.signatures.first_match(window) {
            return StageVerdict::flag(reason);
        }
        if decode_base64_runs(window, 40)
            .iter()
            .any(|decoded| DECODED_MALWARE_KEYWORDS.iter().any(|k| decoded.contains(k)))
        {
            return StageVerdict::flag("base64 payload decodes to shell commands");
        }
        if oversized {
            return StageVerdict::suspicious(
                format!("payload exceeds scan limit ({} bytes)", self.max_scan_bytes),
                OVERSIZED_WEIGHT,
            );
        }
        StageVerdict::Clean
    }
}

// ============================================================
// 3. Data Exfiltration
// ============================================================

/// 대소문자 구분 (키 형식이 고정된 시크릿)
const STRONG_SECRET_PATTERNS: &[(&str, &str)] = &[
    (
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY(?: BLOCK)?-----",
        "private key material",
    ),
    (r"\bAKIA[0-9A-Z]{16}\b", "AWS access key"),
    (r"\bgh[pousr]_[A-Za-z0-9]{36,}\b", "GitHub token"),
    (r"\bsk-[A-Za-z0-9_-]{20,}", "API secret key"),
    (r"\bxox[abprs]-[A-Za-z0-9-]{10,}", "Slack token"),
    (r"(?i)\bbearer\s+[a-z0-9._~+/-]{20,}=*", "bearer token"),
];

const SECRET_REFERENCE_PATTERNS: &[(&str, &str)] = &[
    (
        r"\$\{?[a-z0-9_]*(?:secret|token|api_?key|password|passwd|credential|private_key)[a-z0-9_]*\}?",
        "secret environment variable reference",
    ),
    (
        r"[?&](?:api_?key|key|token|access_token|secret|password|auth)=",
        "secret in query string",
    ),
];

// 값이 `$`로 시작하면 참조일 뿐 실제 자격 증명이 아님
const INLINE_CREDENTIAL_PATTERNS: &[(&str, &str)] = &[(
    r#"(?:password|passwd|api_?key|secret|token)\s*[:=]\s*['"]?[^\s'"&$][^\s'"&]{5,}"#,
    "inline credential assignment",
)];

const SENSITIVE_REFERENCE_PATTERNS: &[(&str, &str)] = &[
    (r"/etc/(?:passwd|shadow|sudoers)\b", "system account database"),
    (r"~/\.ssh\b|\.ssh/|\bid_(?:rsa|ed25519|ecdsa)\b", "SSH keys"),
    (r"\.aws/credentials|\.git-credentials|\.netrc\b|\.npmrc\b", "credential file"),
    (r"(?:^|[\s/'\x22])\.env(?:\.[a-z]+)?\b", "dotenv file"),
];

const OUTBOUND_INTENT_PATTERNS: &[(&str, &str)] = &[
    (
        r"\b(?:curl|wget|scp|rsync|sftp|ftp|nc|ncat|netcat|socat|invoke-webrequest|invoke-restmethod|iwr|irm)\b",
        "network transfer tool",
    ),
    (
        r"--data(?:-binary|-raw|-urlencode)?\b|--upload-file\b|-x\s*(?:post|put)\b|\bupload\b",
        "upload",
    ),
    (r"https?://", "external destination"),
];

const ENV_DUMP_PATTERNS: &[(&str, &str)] = &[(
    r"^\s*(?:env|printenv|set|export\s+-p)\s*(?:$|[|>;&])|\bget-childitem\s+env:|\bgci\s+env:|/proc/self/environ",
    "environment dump",
)];

const SECRET_ONLY_WEIGHT: u32 = 15;
const SENSITIVE_ONLY_WEIGHT: u32 = 10;

/// 시크릿 + 외부 전송 의도 조합 차단
pub struct DataExfiltrationPrevention {
    strong_secrets: PatternSet,
    secret_refs: PatternSet,
    inline_credentials: PatternSet,
    sensitive_refs: PatternSet,
    intent: PatternSet,
    env_dump: PatternSet,
}

impl DataExfiltrationPrevention {
    pub fn new() -> Self {
        Self {
            strong_secrets: PatternSet::new(false, STRONG_SECRET_PATTERNS),
            secret_refs: PatternSet::new(true, SECRET_REFERENCE_PATTERNS),
            inline_credentials: PatternSet::new(true, INLINE_CREDENTIAL_PATTERNS),
            sensitive_refs: PatternSet::new(true, SENSITIVE_REFERENCE_PATTERNS),
            intent: PatternSet::new(true, OUTBOUND_INTENT_PATTERNS),
            env_dump: PatternSet::new(true, ENV_DUMP_PATTERNS),
        }
    }

    fn scan_inbound(&self, text: &str) -> StageVerdict {
        if let Some(reason) = self.env_dump.first_match(text) {
            return StageVerdict::flag(reason);
        }

        let secret = self
            .strong_secrets
            .first_match(text)
            .or_else(|| self.inline_credentials.first_match(text))
            .or_else(|| self.secret_refs.first_match(text));
        let sensitive = self.sensitive_refs.first_match(text);
        let intent = self.intent.first_match(text);

        match (secret, sensitive, intent) {
            (Some(what), _, Some(how)) | (None, Some(what), Some(how)) => {
                StageVerdict::flag(format!("{} combined with outbound transfer ({})", what, how))
            }
            (Some(what), _, None) => StageVerdict::suspicious(what, SECRET_ONLY_WEIGHT),
            (None, Some(what), None) => StageVerdict::suspicious(what, SENSITIVE_ONLY_WEIGHT),
            (None, None, _) => StageVerdict::Clean,
        }
    }

    fn scan_outbound(&self, text: &str) -> StageVerdict {
        if let Some(reason) = self.strong_secrets.first_match(text) {
            return StageVerdict::flag(format!("{} in tool output", reason));
        }
        // 참조만 있는 출력은 통과
        match self.inline_credentials.first_match(text) {
            Some(reason) => StageVerdict::flag(format!("{} in tool output", reason)),
            None => StageVerdict::Clean,
        }
    }
}

impl Default for DataExfiltrationPrevention {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStage for DataExfiltrationPrevention {
    fn name(&self) -> &'static str {
        "exfiltration"
    }

    fn scan(&self, input: &ScanInput<'_>) -> StageVerdict {
        match input.direction {
            ScanDirection::Inbound => self.scan_inbound(input.text),
            ScanDirection::Outbound => self.scan_outbound(input.text),
        }
    }
}

/// 기본 단계 (순서 고정)
pub fn default_stages() -> Vec<Box<dyn ScanStage>> {
    vec![
        Box::new(PromptInjectionProtector::new()),
        Box::new(MalwareDefenseLayer::new()),
        Box::new(DataExfiltrationPrevention::new()),
    ]
}
