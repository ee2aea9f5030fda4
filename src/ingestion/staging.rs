//! Request-scoped staging of uploaded bytes.
//!
//! A staged upload is a `NamedTempFile` inside the staging directory. Dropping
//! it, on success, failure or cancellation, removes the file.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),
}

/// Directory holding in-flight uploads.
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
    max_file_size: Option<u64>,
}

/// An upload fully copied into the staging area.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    size: u64,
}

/// Result of moving a staged file to its final location.
#[derive(Debug)]
pub enum Placement {
    /// The file at the target was created by this placement.
    Created,
    /// The target already existed and was left untouched. The staged copy is
    /// handed back so the caller can still use it.
    AlreadyPresent(StagedFile),
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: Option<u64>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if needed.
    pub async fn init(&self) -> Result<(), StagingError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Copy `reader` to its end into a fresh staging slot.
    ///
    /// The slot is deleted again if the copy fails, exceeds the size limit,
    /// or the returned future is dropped before completing.
    pub async fn stage<R>(
        &self,
        reader: R,
        original_filename: &str,
    ) -> Result<StagedFile, StagingError>
    where
        R: AsyncRead + Unpin,
    {
        let dir = self.dir.clone();
        let suffix = match sanitize_filename(original_filename) {
            Some(name) => format!("-{}", name),
            None => String::new(),
        };
        let named = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            tempfile::Builder::new()
                .prefix(".upload-")
                .suffix(&suffix)
                .tempfile_in(&dir)
        })
        .await
        .map_err(io::Error::other)??;

        let mut file = tokio::fs::File::from_std(named.reopen()?);
        let size = match self.max_file_size {
            Some(max) => {
                let mut limited = reader.take(max + 1);
                let written = tokio::io::copy(&mut limited, &mut file).await?;
                if written > max {
                    return Err(StagingError::FileTooLarge(written, max));
                }
                written
            }
            None => {
                let mut reader = reader;
                tokio::io::copy(&mut reader, &mut file).await?
            }
        };
        file.flush().await?;

        Ok(StagedFile { file: named, size })
    }
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Move the staged bytes to `target`, creating parent directories.
    ///
    /// Never overwrites an existing file. When a rename is impossible (e.g. the
    /// target is on another filesystem) the bytes are copied into a newly
    /// created file instead. Blocking.
    pub fn place(self, target: &Path) -> io::Result<Placement> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let StagedFile { file, size } = self;
        let file = match file.persist_noclobber(target) {
            Ok(_) => return Ok(Placement::Created),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(Placement::AlreadyPresent(StagedFile { file: e.file, size }));
            }
            Err(e) => e.file,
        };

        let mut out = match OpenOptions::new().write(true).create_new(true).open(target) {
            Ok(out) => out,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(Placement::AlreadyPresent(StagedFile { file, size }));
            }
            Err(e) => return Err(e),
        };
        let copied = file
            .reopen()
            .and_then(|mut src| io::copy(&mut src, &mut out))
            .and_then(|_| out.sync_all());
        if let Err(e) = copied {
            drop(out);
            let _ = std::fs::remove_file(target);
            return Err(e);
        }
        Ok(Placement::Created)
    }
}

/// Strip path components and characters that are unsafe in file names.
///
/// Returns `None` when nothing usable is left.
fn sanitize_filename(filename: &str) -> Option<String> {
    let name = Path::new(filename).file_name().and_then(|n| n.to_str())?;

    if name.contains('\0') || name == ".." {
        return None;
    }

    let sanitized: String = name
        .trim_start_matches('.')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}
