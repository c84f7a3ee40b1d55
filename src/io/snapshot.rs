//! Repository snapshotter: the textual working-tree context fed to the model.
//!
//! The snapshot is deterministic given the working tree: a sorted recursive
//! walk with fixed ignore sets and one size cap. The planner and the generator
//! receive the identical snapshot text so cross-references between their
//! prompts stay valid.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Files larger than this are truncated with a marker.
pub const MAX_FILE_BYTES: usize = 20_000;

/// Directory names skipped entirely (version control, dependency caches,
/// build output, hosting caches).
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".next",
    "dist",
    "build",
    ".vercel",
    "coverage",
    "target",
    ".autopr",
];

/// Lockfiles of common package managers.
const IGNORED_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
];

/// Produce the snapshot blob: every file as `path\n---\ncontent`, blocks
/// separated by blank lines, paths repo-relative with `/` separators.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn snapshot(root: &Path) -> Result<String> {
    let mut blocks = Vec::new();
    walk(root, root, &mut blocks)?;
    debug!(files = blocks.len(), "snapshot complete");
    Ok(blocks.join("\n"))
}

fn walk(root: &Path, dir: &Path, blocks: &mut Vec<String>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("list dir {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            if IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            walk(root, &path, blocks)?;
        } else if file_type.is_file() {
            if IGNORED_FILES.contains(&name.as_str()) {
                continue;
            }
            blocks.push(render_file(root, &path)?);
        }
        // Symlinks and other entry types are skipped.
    }
    Ok(())
}

fn render_file(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_FILE_BYTES)]).into_owned();
    if bytes.len() > MAX_FILE_BYTES {
        content.push_str(&format!("\n[truncated {} bytes]", bytes.len() - MAX_FILE_BYTES));
    }

    Ok(format!("{relative}\n---\n{content}\n"))
}
