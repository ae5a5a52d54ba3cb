//! Document-level entry points.
//!
//! A document is a MinerU `full.md` with its figures under `images/`. Each
//! local image is described once through the [`Dispatcher`] and the document
//! is rewritten to `<stem>.iee.md` next to the original, which is never
//! modified.

use crate::config::DescribeConfig;
use crate::dispatch::Dispatcher;
use crate::error::IeeuError;
use crate::markdown;
use crate::output::{DirectoryReport, DocumentFailure, DocumentReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the Markdown file MinerU writes for each converted PDF.
pub const DOCUMENT_FILE_NAME: &str = "full.md";

/// Suffix of the rewritten document.
pub const OUTPUT_SUFFIX: &str = ".iee.md";

/// Describe the images of one Markdown document.
///
/// Writes `<stem>.iee.md` when at least one image was described.
///
/// # Errors
/// Only fatal problems: invalid config, unreadable document, unwritable
/// output. Failed images are listed in [`DocumentReport::failed_keys`].
pub async fn describe_document(
    path: impl AsRef<Path>,
    config: &DescribeConfig,
) -> Result<DocumentReport, IeeuError> {
    let dispatcher = Dispatcher::new(config)?;
    process_document(&dispatcher, path.as_ref()).await
}

/// Describe every `full.md` in `dir` and its immediate subdirectories.
///
/// Documents are processed one after another in path order. A document that
/// fails is recorded in [`DirectoryReport::errors`] and the run moves on,
/// except after the API is declared unusable: the remaining documents are
/// then listed in [`DirectoryReport::skipped`] without any call being made.
pub async fn describe_directory(
    dir: impl AsRef<Path>,
    config: &DescribeConfig,
) -> Result<DirectoryReport, IeeuError> {
    let dir = dir.as_ref();
    let dispatcher = Dispatcher::new(config)?;
    let documents = find_documents(dir).await?;
    info!("Found {} document(s) in {}", documents.len(), dir.display());

    let mut report = DirectoryReport::default();
    let mut documents = documents.into_iter();

    for path in documents.by_ref() {
        match process_document(&dispatcher, &path).await {
            Ok(doc) => {
                let unusable = doc.api_totally_failed;
                report.documents.push(doc);
                if unusable {
                    warn!("API unusable; skipping the remaining documents");
                    break;
                }
            }
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                report.errors.push(DocumentFailure {
                    source: path,
                    error: e.to_string(),
                });
            }
        }
    }
    report.skipped.extend(documents);

    Ok(report)
}

/// `full.md` files directly in `dir` or one level below, sorted.
pub async fn find_documents(dir: &Path) -> Result<Vec<PathBuf>, IeeuError> {
    if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(IeeuError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }
    let read_err = |e| IeeuError::DocumentRead {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut found = Vec::new();
    let top = dir.join(DOCUMENT_FILE_NAME);
    if tokio::fs::metadata(&top).await.map(|m| m.is_file()).unwrap_or(false) {
        found.push(top);
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let candidate = entry.path().join(DOCUMENT_FILE_NAME);
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            found.push(candidate);
        }
    }

    found.sort();
    Ok(found)
}

/// `<dir>/<stem>.iee.md` for a document at `<dir>/<stem>.md`.
pub fn output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    source.with_file_name(format!("{stem}{OUTPUT_SUFFIX}"))
}

async fn process_document(dispatcher: &Dispatcher, path: &Path) -> Result<DocumentReport, IeeuError> {
    let start = Instant::now();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IeeuError::DocumentRead {
            path: path.to_path_buf(),
            source: e,
        })?;

    let references = markdown::extract_image_references(&content);
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let items = markdown::work_items(&references, base_dir);
    info!(
        "{}: {} image reference(s), {} to describe",
        path.display(),
        references.len(),
        items.len()
    );

    let mut report = DocumentReport {
        source: path.to_path_buf(),
        output: None,
        references: references.len(),
        images: items.len(),
        described: 0,
        failed_keys: Vec::new(),
        degraded_to_sequential: false,
        api_totally_failed: false,
        duration_ms: 0,
    };

    if items.is_empty() {
        debug!("{}: no local images, nothing to write", path.display());
        report.duration_ms = start.elapsed().as_millis() as u64;
        return Ok(report);
    }

    let result = dispatcher.dispatch(&items).await?;
    for reference in references.iter().filter(|r| r.is_local_image()) {
        if !result.descriptions.contains_key(&reference.path) {
            warn!(
                "{}:{}: no description for {}",
                path.display(),
                reference.line,
                reference.path
            );
        }
    }

    if !result.descriptions.is_empty() {
        let rewritten = markdown::substitute(&content, &result.descriptions);
        let target = output_path(path);
        write_atomic(&target, rewritten).await?;
        info!("{}: wrote {}", path.display(), target.display());
        report.output = Some(target);
    }

    report.described = result.descriptions.len();
    report.failed_keys = result.failed_keys;
    report.degraded_to_sequential = result.degraded_to_sequential;
    report.api_totally_failed = result.api_totally_failed;
    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

/// Write `contents` to `path` via a temp file in the same directory and rename.
async fn write_atomic(path: &Path, contents: String) -> Result<(), IeeuError> {
    let target = path.to_path_buf();
    let write_err = {
        let target = target.clone();
        move |e: std::io::Error| IeeuError::OutputWriteFailed {
            path: target.clone(),
            source: e,
        }
    };

    tokio::task::spawn_blocking(move || {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(&write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(&write_err)?;
        tmp.persist(&target).map_err(|e| write_err(e.error))?;
        Ok::<(), IeeuError>(())
    })
    .await
    .map_err(|e| IeeuError::Internal(format!("write task: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_uses_iee_suffix() {
        assert_eq!(
            output_path(Path::new("/docs/paper/full.md")),
            PathBuf::from("/docs/paper/full.iee.md")
        );
    }

    #[tokio::test]
    async fn find_documents_top_level_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("full.md"), "# top").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/full.md"), "# b").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/full.md"), "# a").unwrap();
        std::fs::write(dir.path().join("notes.md"), "# ignored").unwrap();

        let found = find_documents(dir.path()).await.unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("a/full.md"),
                dir.path().join("b/full.md"),
                dir.path().join("full.md"),
            ]
        );
    }

    #[tokio::test]
    async fn find_documents_missing_dir() {
        let err = find_documents(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, IeeuError::DirectoryNotFound { .. }));
    }

    #[tokio::test]
    async fn write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("full.iee.md");
        std::fs::write(&target, "old").unwrap();
        write_atomic(&target, "new".to_string()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
