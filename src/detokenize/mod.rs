//! Repository detokenization
//!
//! Template repositories carry `<TOKEN>` placeholders. Rendering replaces
//! them literally in every file of a tree. A second render of an already
//! rendered tree changes nothing.

mod values;

pub use values::{TemplateValues, POST_CLOUD_TOKENS, TOKENS};

use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;
use tracing::debug;
use walkdir::WalkDir;

use crate::{Error, Result};

/// Summary of one render
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedTree {
    /// Root that was rendered
    pub root: PathBuf,
    /// Text files examined
    pub files_scanned: usize,
    /// Files whose content changed
    pub files_changed: usize,
}

/// Renders a directory tree in place
#[cfg_attr(test, automock)]
pub trait Detokenizer: Send + Sync {
    /// Replace every token under `root`, skipping `.git`
    fn render_tree(&self, root: &Path, values: &TemplateValues) -> Result<RenderedTree>;
}

/// Plain string replacement over UTF-8 files
#[derive(Clone, Debug, Default)]
pub struct LiteralDetokenizer;

impl Detokenizer for LiteralDetokenizer {
    fn render_tree(&self, root: &Path, values: &TemplateValues) -> Result<RenderedTree> {
        let mut summary = RenderedTree {
            root: root.to_path_buf(),
            ..Default::default()
        };
        walk(root, values, &mut summary)?;
        debug!(
            root = %root.display(),
            scanned = summary.files_scanned,
            changed = summary.files_changed,
            "Detokenized tree"
        );
        Ok(summary)
    }
}

fn walk(root: &Path, values: &TemplateValues, summary: &mut RenderedTree) -> Result<()> {
    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ".git"));

    for entry in entries {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::detokenize(path, e.to_string())
        })?;
        if entry.file_type().is_file() {
            render_file(entry.path(), values, summary)?;
        }
    }
    Ok(())
}

fn render_file(path: &Path, values: &TemplateValues, summary: &mut RenderedTree) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|e| Error::detokenize(path, e.to_string()))?;
    let Ok(content) = String::from_utf8(bytes) else {
        return Ok(());
    };
    summary.files_scanned += 1;

    let rendered = values.render(&content);
    if rendered != content {
        std::fs::write(path, rendered).map_err(|e| Error::detokenize(path, e.to_string()))?;
        summary.files_changed += 1;
    }
    Ok(())
}
