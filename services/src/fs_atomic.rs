//! Atomic file replacement.
//!
//! Writers serialize the full document to `<target>.tmp` in the same
//! directory, then rename over the target. Readers therefore only ever see
//! the previous or the next fully written file, never a torn one.

use std::io;
use std::path::Path;

use tokio::fs;

/// Writes `bytes` to `path` atomically, creating parent directories.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }

    let tmp = match path.file_name() {
        Some(name) => {
            let mut tmp_name = name.to_os_string();
            tmp_name.push(".tmp");
            path.with_file_name(tmp_name)
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "atomic write target has no file name",
            ));
        }
    };

    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_atomic(&path, b"{\"v\":1}").await.unwrap();
        write_atomic(&path, b"{\"v\":2}").await.unwrap();

        let data = fs::read_to_string(&path).await.unwrap();
        assert_eq!(data, "{\"v\":2}");
        // No stray temp file left behind.
        assert!(!path.with_file_name("doc.json.tmp").exists());
    }
}
