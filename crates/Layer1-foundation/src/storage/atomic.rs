//! Atomic write - write-then-rename

use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// 파일을 원자적으로 기록
///
/// 같은 디렉토리의 임시 파일에 쓰고 `sync_all` 후 대상 경로로 rename 합니다.
/// rename 은 같은 파일시스템 안에서 원자적이므로 읽는 쪽은 항상 이전 내용이나
/// 새 내용 중 하나만 보게 됩니다.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| {
        Error::Persistence(format!("Failed to create {}: {}", parent.display(), e))
    })?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Persistence(format!("Invalid path: {}", path.display())))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Persistence(format!(
            "Failed to write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

/// 값을 pretty JSON 으로 직렬화해서 원자적으로 기록
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Persistence(format!("Failed to serialize: {}", e)))?;
    atomic_write(path, &content)
}
