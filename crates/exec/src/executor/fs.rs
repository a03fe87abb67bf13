//! Filesystem operations.  `target` is the path as the model wrote it and
//! is used in messages; `path` is the resolved location.

use std::io;
use std::path::Path;

use aish_core::ExecutionError;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

type FsResult = Result<String, ExecutionError>;

fn io_failure(target: &str, err: io::Error) -> ExecutionError {
    match err.kind() {
        io::ErrorKind::NotFound => ExecutionError::NotFound(target.to_string()),
        io::ErrorKind::AlreadyExists => ExecutionError::AlreadyExists(target.to_string()),
        _ => ExecutionError::Io {
            path: target.to_string(),
            message: err.to_string(),
        },
    }
}

pub(super) async fn make_dir(target: &str, path: &Path, overwrite: bool) -> FsResult {
    match fs::metadata(path).await {
        Ok(_) if !overwrite => Err(ExecutionError::AlreadyExists(target.to_string())),
        Ok(meta) if meta.is_dir() => Ok(format!("Directory already exists: {target}")),
        Ok(_) => Err(ExecutionError::NotADirectory(target.to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)
                .await
                .map_err(|e| io_failure(target, e))?;
            Ok(format!("Created directory: {target}"))
        }
        Err(e) => Err(io_failure(target, e)),
    }
}

/// Parent directories are not created; a missing parent is `NotFound`.
pub(super) async fn make_file(target: &str, path: &Path, content: Option<&str>, overwrite: bool) -> FsResult {
    let mut options = fs::OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = options.open(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ExecutionError::NotFound(
            path.parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| target.to_string()),
        ),
        _ => io_failure(target, e),
    })?;

    let content = content.unwrap_or_default();
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| io_failure(target, e))?;
    file.flush().await.map_err(|e| io_failure(target, e))?;
    Ok(format!("Created file: {target} ({} bytes)", content.len()))
}

pub(super) async fn write_file(target: &str, path: &Path, content: &str) -> FsResult {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_failure(target, e))?;
    }
    fs::write(path, content)
        .await
        .map_err(|e| io_failure(target, e))?;
    Ok(format!("Wrote {} bytes to {target}", content.len()))
}

/// Never holds more than `limit + 1` bytes.  Regular files are refused
/// from their metadata; pipes, devices and procfs entries report no useful
/// size and are cut off while reading.
pub(super) async fn read_file(target: &str, path: &Path, limit: u64) -> FsResult {
    let meta = fs::metadata(path).await.map_err(|e| io_failure(target, e))?;
    if meta.is_dir() {
        return Err(ExecutionError::Io {
            path: target.to_string(),
            message: "is a directory; use fs_listdir".to_string(),
        });
    }
    let too_large = |size| ExecutionError::TooLarge {
        path: target.to_string(),
        size,
        limit,
    };
    if meta.len() > limit {
        return Err(too_large(meta.len()));
    }

    let file = fs::File::open(path).await.map_err(|e| io_failure(target, e))?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| io_failure(target, e))?;
    if bytes.len() as u64 > limit {
        return Err(too_large(bytes.len() as u64));
    }

    String::from_utf8(bytes).map_err(|_| ExecutionError::Io {
        path: target.to_string(),
        message: "file is not valid UTF-8 text".to_string(),
    })
}

/// Entry names sorted lexicographically, one per line.
pub(super) async fn list_dir(target: &str, path: &Path) -> FsResult {
    let meta = fs::metadata(path).await.map_err(|e| io_failure(target, e))?;
    if !meta.is_dir() {
        return Err(ExecutionError::NotADirectory(target.to_string()));
    }

    let mut entries = fs::read_dir(path).await.map_err(|e| io_failure(target, e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_failure(target, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names.join("\n"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn make_dir_creates_parents_and_respects_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c");
        assert_eq!(make_dir("a/b/c", &path, false).await.unwrap(), "Created directory: a/b/c");
        assert!(path.is_dir());

        assert_eq!(
            make_dir("a/b/c", &path, false).await.unwrap_err(),
            ExecutionError::AlreadyExists("a/b/c".into())
        );
        assert!(make_dir("a/b/c", &path, true).await.is_ok());

        std::fs::write(dir.path().join("file"), "").unwrap();
        assert_eq!(
            make_dir("file", &dir.path().join("file"), true).await.unwrap_err(),
            ExecutionError::NotADirectory("file".into())
        );
    }

    #[tokio::test]
    async fn make_file_refuses_existing_unless_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        make_file("notes.md", &path, Some("first"), false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        assert_eq!(
            make_file("notes.md", &path, Some("second"), false).await.unwrap_err(),
            ExecutionError::AlreadyExists("notes.md".into())
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        make_file("notes.md", &path, None, true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn make_file_does_not_create_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing/notes.md");
        let err = make_file("missing/notes.md", &path, None, false).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NotFound(p) if p.ends_with("missing")));
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn write_file_creates_parents_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep/nested/out.txt");
        write_file("deep/nested/out.txt", &path, "one").await.unwrap();
        let msg = write_file("deep/nested/out.txt", &path, "three").await.unwrap();
        assert_eq!(msg, "Wrote 5 bytes to deep/nested/out.txt");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "three");
    }

    #[tokio::test]
    async fn read_file_failures_are_specific() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            read_file("nope.txt", &dir.path().join("nope.txt"), 1024).await.unwrap_err(),
            ExecutionError::NotFound("nope.txt".into())
        );
        assert!(matches!(
            read_file(".", dir.path(), 1024).await.unwrap_err(),
            ExecutionError::Io { .. }
        ));

        let big = dir.path().join("big.log");
        std::fs::write(&big, vec![b'x'; 2048]).unwrap();
        assert_eq!(
            read_file("big.log", &big, 1024).await.unwrap_err(),
            ExecutionError::TooLarge {
                path: "big.log".into(),
                size: 2048,
                limit: 1024,
            }
        );

        let binary = dir.path().join("blob.bin");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        let err = read_file("blob.bin", &binary, 1024).await.unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_file_caps_sources_without_a_size() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe.txt");
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        let writer_path = fifo.clone();
        let writer = std::thread::spawn(move || {
            use std::io::Write;
            let mut pipe = std::fs::OpenOptions::new().write(true).open(writer_path).unwrap();
            // The reader stops early, so the tail of this write may hit EPIPE.
            let _ = pipe.write_all(&vec![b'a'; 4 * 1024 * 1024]);
        });

        let err = read_file("pipe.txt", &fifo, 1024).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::TooLarge {
                path: "pipe.txt".into(),
                size: 1025,
                limit: 1024,
            }
        );
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn read_file_accepts_exactly_the_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edge.txt");
        std::fs::write(&path, "x".repeat(1024)).unwrap();
        assert_eq!(read_file("edge.txt", &path, 1024).await.unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn list_dir_is_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["zeta.txt", "alpha", "Beta.md"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(list_dir(".", dir.path()).await.unwrap(), "Beta.md\nalpha\nzeta.txt");

        assert_eq!(
            list_dir("zeta.txt", &dir.path().join("zeta.txt")).await.unwrap_err(),
            ExecutionError::NotADirectory("zeta.txt".into())
        );
        assert_eq!(
            list_dir("gone", &dir.path().join("gone")).await.unwrap_err(),
            ExecutionError::NotFound("gone".into())
        );
    }
}
