//! Image references in MinerU-style Markdown.
//!
//! Documents reference figures as `![alt](images/<hash>.jpg)`. Only paths
//! under `images/` are sent for description; anything else (remote URLs,
//! `../` paths) is left alone.

use crate::pipeline::runner::WorkItem;
use crate::prompts::FIGURE_FENCE;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Directory prefix of images produced alongside the document.
pub const IMAGES_PREFIX: &str = "images/";

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

/// One `![alt](path)` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The matched text, e.g. `![](images/a.jpg)`.
    pub raw: String,
    pub alt: String,
    pub path: String,
    /// 1-based line of the match.
    pub line: usize,
    /// 1-based position among all references in the document.
    pub figure_num: usize,
}

impl ImageReference {
    /// Whether this reference points into the document's `images/` directory.
    pub fn is_local_image(&self) -> bool {
        self.path.starts_with(IMAGES_PREFIX)
    }
}

/// Every image reference in `content`, in document order.
pub fn extract_image_references(content: &str) -> Vec<ImageReference> {
    RE_IMAGE
        .captures_iter(content)
        .enumerate()
        .map(|(index, caps)| {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            ImageReference {
                raw: caps[0].to_string(),
                alt: caps[1].to_string(),
                path: caps[2].trim().to_string(),
                line: content[..whole.start].matches('\n').count() + 1,
                figure_num: index + 1,
            }
        })
        .collect()
}

/// Work items for the local images in `refs`, resolved against `base_dir`.
///
/// An image referenced several times is described once.
pub fn work_items(refs: &[ImageReference], base_dir: &Path) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| r.is_local_image())
        .filter(|r| seen.insert(r.path.as_str()))
        .map(|r| WorkItem::new(r.path.clone(), base_dir.join(&r.path)))
        .collect()
}

/// The fenced block that replaces a described image.
pub fn build_replacement(figure_num: usize, description: &str) -> String {
    format!("{FIGURE_FENCE} {figure_num}\n{description}\n```")
}

/// Replace each described reference with its figure block.
///
/// Figure numbers follow document order over all references, so they match
/// [`extract_image_references`]. References without a description stay as
/// they are.
pub fn substitute(content: &str, descriptions: &BTreeMap<String, String>) -> String {
    let mut figure_num = 0;
    RE_IMAGE
        .replace_all(content, |caps: &Captures| {
            figure_num += 1;
            match descriptions.get(caps[2].trim()) {
                Some(description) => build_replacement(figure_num, description),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
