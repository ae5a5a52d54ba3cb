//! Document and directory processing end to end, with an in-process backend.

use async_trait::async_trait;
use edgequake_ieeu::{
    describe_directory, describe_document, CallFailure, DescribeConfig, VisionBackend,
    VisionRequest,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Describes every image by file name, or rejects every call with 401.
struct NamingBackend {
    reject: bool,
    calls: AtomicUsize,
}

impl NamingBackend {
    fn new(reject: bool) -> Arc<Self> {
        Arc::new(Self {
            reject,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VisionBackend for NamingBackend {
    async fn complete(&self, request: &VisionRequest) -> Result<String, CallFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(CallFailure::Http {
                status: 401,
                body: "invalid api key".into(),
            });
        }
        let name = Path::new(&request.source)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("```figure\nDiagram {name}.\n```"))
    }
}

fn config(backend: Arc<NamingBackend>) -> DescribeConfig {
    DescribeConfig::builder()
        .model("stub-vlm")
        .backend(backend)
        .retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

/// A MinerU-style output directory: `full.md` plus `images/`.
fn write_document(dir: &Path, content: &str, images: &[&str]) {
    std::fs::create_dir_all(dir.join("images")).unwrap();
    for image in images {
        std::fs::write(dir.join("images").join(image), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    }
    std::fs::write(dir.join("full.md"), content).unwrap();
}

const PAPER: &str = "# Paper\n\n\
![](images/a.jpg)\n\n\
Text with a logo ![logo](https://example.org/logo.png).\n\n\
![Figure 2](images/b.jpg)\n\n\
![](images/missing.jpg)\n";

#[tokio::test]
async fn document_is_rewritten_next_to_the_original() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), PAPER, &["a.jpg", "b.jpg"]);
    let backend = NamingBackend::new(false);

    let report = describe_document(dir.path().join("full.md"), &config(backend.clone()))
        .await
        .unwrap();

    assert_eq!(report.references, 4);
    assert_eq!(report.images, 3);
    assert_eq!(report.described, 2);
    assert_eq!(report.failed_keys, vec!["images/missing.jpg"]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

    let output = dir.path().join("full.iee.md");
    assert_eq!(report.output.as_deref(), Some(output.as_path()));
    let rewritten = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        rewritten,
        "# Paper\n\n\
```figure 1\nDiagram a.\n```\n\n\
Text with a logo ![logo](https://example.org/logo.png).\n\n\
```figure 3\nDiagram b.\n```\n\n\
![](images/missing.jpg)\n"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("full.md")).unwrap(), PAPER);
}

#[tokio::test]
async fn document_without_images_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), "# Notes\n\nNo figures here.\n", &[]);
    let backend = NamingBackend::new(false);

    let report = describe_document(dir.path().join("full.md"), &config(backend.clone()))
        .await
        .unwrap();

    assert_eq!(report.images, 0);
    assert!(report.output.is_none());
    assert!(!dir.path().join("full.iee.md").exists());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_document_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = describe_document(dir.path().join("full.md"), &config(NamingBackend::new(false))).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn directory_processes_every_document() {
    let root = tempfile::tempdir().unwrap();
    write_document(&root.path().join("paper-a"), "![](images/x.jpg)\n", &["x.jpg"]);
    write_document(&root.path().join("paper-b"), "![](images/y.jpg)\n", &["y.jpg"]);
    let backend = NamingBackend::new(false);

    let report = describe_directory(root.path(), &config(backend)).await.unwrap();

    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.total_described(), 2);
    assert!(report.errors.is_empty() && report.skipped.is_empty());
    assert_eq!(
        std::fs::read_to_string(root.path().join("paper-b/full.iee.md")).unwrap(),
        "```figure 1\nDiagram y.\n```\n"
    );
}

#[tokio::test]
async fn rejected_credential_skips_remaining_documents() {
    let root = tempfile::tempdir().unwrap();
    write_document(
        &root.path().join("paper-a"),
        "![](images/x.jpg)\n![](images/z.jpg)\n",
        &["x.jpg", "z.jpg"],
    );
    write_document(&root.path().join("paper-b"), "![](images/y.jpg)\n", &["y.jpg"]);
    let backend = NamingBackend::new(true);

    let report = describe_directory(root.path(), &config(backend.clone()))
        .await
        .unwrap();

    assert!(report.api_unusable());
    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.skipped, vec![root.path().join("paper-b/full.md")]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(!root.path().join("paper-a/full.iee.md").exists());
}

#[tokio::test]
async fn missing_directory_is_an_error() {
    let result = describe_directory("/definitely/not/here", &config(NamingBackend::new(false))).await;
    assert!(result.is_err());
}
