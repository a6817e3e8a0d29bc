//! 경로 분석 - 워크스페이스 경계와 민감 경로

use std::path::{Component, Path, PathBuf};

// ============================================================
// 워크스페이스 경계
// ============================================================

/// 파일 작업이 허용되는 루트 디렉토리
#[derive(Debug, Clone)]
pub struct WorkspaceBoundary {
    root: PathBuf,
}

impl WorkspaceBoundary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or_else(|_| lexical_normalize(&root));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 경로를 워크스페이스 기준 절대 경로로 해석. 경계를 벗어나면 None
    ///
    /// 존재하는 가장 가까운 조상 디렉토리는 canonicalize 해서 심볼릭 링크 탈출도 막습니다.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = lexical_normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return None;
        }

        let resolved = canonicalize_existing_prefix(&normalized);
        if resolved.starts_with(&self.root) {
            Some(resolved)
        } else {
            None
        }
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_some()
    }

    /// 루트 기준 상대 경로 (표시용)
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

/// `.` / `..` 를 파일시스템 접근 없이 정리
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    resolved
}

// ============================================================
// 위험 확장자
// ============================================================

/// 실행 파일 / 스크립트 확장자
pub const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "ps1", "vbs", "js", "jar", "scr", "msi", "com", "pif", "reg", "hta",
    "wsf", "lnk", "dll", "sh",
];

pub fn dangerous_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    DANGEROUS_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

// ============================================================
// 민감 경로
// ============================================================

/// 민감한 파일 패턴들
pub fn sensitive_file_patterns() -> Vec<SensitivePath> {
    [
        // 환경 변수 / 시크릿
        SensitivePath::new("**/.env", "Environment variables", 8),
        SensitivePath::new("**/.env.*", "Environment variables", 8),
        SensitivePath::new("**/secrets.*", "Secrets file", 9),
        SensitivePath::new("**/credentials*", "Credentials", 9),
        SensitivePath::new("**/*.secret", "Secret file", 9),
        // SSH / 암호화 키
        SensitivePath::new("**/.ssh/**", "SSH directory", 10),
        SensitivePath::new("**/*.pem", "PEM certificate", 9),
        SensitivePath::new("**/*.key", "Private key", 9),
        SensitivePath::new("**/*_rsa", "RSA key", 10),
        SensitivePath::new("**/*_ed25519", "ED25519 key", 10),
        SensitivePath::new("**/id_rsa*", "RSA identity", 10),
        // 클라우드 / 패키지 자격 증명
        SensitivePath::new("**/.aws/**", "AWS credentials", 10),
        SensitivePath::new("**/.npmrc", "NPM credentials", 7),
        SensitivePath::new("**/.pypirc", "PyPI credentials", 7),
        SensitivePath::new("**/.netrc", "Network credentials", 8),
        SensitivePath::new("**/.git-credentials", "Git credentials", 9),
        // 데이터베이스
        SensitivePath::new("**/*.sqlite", "SQLite database", 6),
        SensitivePath::new("**/*.db", "Database file", 6),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// 민감 경로 정의
#[derive(Debug, Clone)]
pub struct SensitivePath {
    pub pattern: glob::Pattern,
    pub description: &'static str,
    pub risk_level: u8,
}

impl SensitivePath {
    fn new(pattern: &str, description: &'static str, risk_level: u8) -> Option<Self> {
        Some(Self {
            pattern: glob::Pattern::new(pattern).ok()?,
            description,
            risk_level: risk_level.min(10),
        })
    }

    /// 경로가 이 패턴에 매칭되는지 확인
    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/ws/a/../b/./c.txt")),
            PathBuf::from("/ws/b/c.txt")
        );
    }

    #[test]
    fn test_workspace_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceBoundary::new(dir.path());

        let inside = ws.resolve("src/main.rs").unwrap();
        assert!(inside.starts_with(ws.root()));
        assert_eq!(ws.relative(&inside), format!("src{}main.rs", std::path::MAIN_SEPARATOR));

        assert!(ws.resolve("../outside.txt").is_none());
        assert!(ws.resolve("a/../../outside.txt").is_none());
        assert!(ws.resolve("/etc/passwd").is_none());
        assert!(ws.contains(ws.root().join("nested/file.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let ws = WorkspaceBoundary::new(dir.path());
        assert!(ws.resolve("link/secret.txt").is_none());
    }

    #[test]
    fn test_dangerous_extension() {
        assert_eq!(dangerous_extension(Path::new("setup.EXE")), Some("exe".to_string()));
        assert_eq!(dangerous_extension(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_path_sensitivity() {
        let patterns = sensitive_file_patterns();
        let is_sensitive = |p: &str| patterns.iter().any(|s| s.matches(Path::new(p)));

        assert!(is_sensitive("/home/user/project/.env"));
        assert!(is_sensitive("/home/user/.ssh/id_rsa"));
        assert!(!is_sensitive("/home/user/code/main.rs"));
    }
}
