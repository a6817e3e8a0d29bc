//! JSON 파일 저장소

use crate::storage::atomic_write_json;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// JSON 파일 저장소
///
/// 설정, 격리 목록, 태스크 레코드 등 디렉토리 단위 JSON 파일을 관리합니다.
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 글로벌 설정 (~/.config/warden/)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join("warden");
        Ok(Self::new(dir))
    }

    /// 프로젝트 설정 (.warden/)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(".warden"))
    }

    /// 현재 디렉토리 프로젝트 설정
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir).map_err(|e| {
                Error::Persistence(format!("Failed to create directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// JSON 로드
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Persistence(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// JSON 로드 (기본값)
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> T {
        self.load(filename).unwrap_or_default()
    }

    /// JSON 로드 (Optional)
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        if !path.exists() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// JSON 저장
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Persistence(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&path, content).map_err(|e| {
            Error::Persistence(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// JSON 저장 (write-then-rename)
    pub fn save_atomic<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        atomic_write_json(&self.file_path(filename), data)
    }

    /// 주어진 확장자를 가진 파일 이름 목록
    pub fn list(&self, extension: &str) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.base_dir).map_err(|e| {
            Error::Persistence(format!("Failed to list {}: {}", self.base_dir.display(), e))
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == extension).unwrap_or(false))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    /// 파일 존재 여부
    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }

    /// 파일 삭제
    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.file_path(filename);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                Error::Persistence(format!("Failed to remove {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("tasks"));

        store.save_atomic("b.json", &vec![1, 2, 3]).unwrap();
        store.save("a.json", &vec![4]).unwrap();

        assert_eq!(store.list("json").unwrap(), vec!["a.json", "b.json"]);
        let loaded: Vec<i32> = store.load("b.json").unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);

        store.remove("a.json").unwrap();
        assert!(!store.exists("a.json"));
        assert!(store.load_optional::<Vec<i32>>("a.json").unwrap().is_none());
    }
}
