//! Working-tree writes: materialising model-emitted file changes and test
//! proposals, and scanning the existing test root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::proposals::TEST_ROOT;
use crate::core::types::{FileChange, ProposalAction, TestFile, TestProposal};

/// Write every change to disk byte-for-byte, creating directories as needed.
///
/// Paths must be repo-relative; absolute paths and parent-escaping components
/// are rejected before anything is written.
#[instrument(skip_all, fields(changes = changes.len()))]
pub fn apply_changes(root: &Path, changes: &[FileChange]) -> Result<()> {
    for change in changes {
        let target = resolve(root, &change.path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, change.content.as_bytes())
            .with_context(|| format!("write {}", target.display()))?;
        debug!(path = %change.path, bytes = change.content.len(), "wrote file change");
    }
    Ok(())
}

/// Materialise normalized test proposals. Renames remove the old path first;
/// a missing old path is tolerated (the proposal may rename a file the model
/// only believed existed).
#[instrument(skip_all, fields(proposals = proposals.len()))]
pub fn apply_test_proposals(root: &Path, proposals: &[TestProposal]) -> Result<()> {
    for proposal in proposals {
        if proposal.action == ProposalAction::Rename && !proposal.old_path.is_empty() {
            let old = resolve(root, &proposal.old_path)?;
            match fs::remove_file(&old) {
                Ok(()) => debug!(path = %proposal.old_path, "removed renamed test file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %proposal.old_path, "rename source missing, writing new path only");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("remove {}", old.display()));
                }
            }
        }
        let target = resolve(root, &proposal.path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, proposal.test_content.as_bytes())
            .with_context(|| format!("write {}", target.display()))?;
    }
    Ok(())
}

/// All files under the test root whose names follow the unit-test naming
/// convention, sorted by path.
pub fn existing_test_files(root: &Path) -> Result<Vec<TestFile>> {
    let test_root = root.join(TEST_ROOT);
    if !test_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    collect_test_files(root, &test_root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_test_files(root: &Path, dir: &Path, files: &mut Vec<TestFile>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list dir {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_test_files(root, &path, files)?;
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains(".test.") {
            continue;
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(TestFile {
            path: relative,
            content,
        });
    }
    Ok(())
}

fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(anyhow!("refusing absolute path '{relative}'"));
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(anyhow!("refusing parent-escaping path '{relative}'"));
        }
    }
    Ok(root.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, content: &str) -> FileChange {
        FileChange {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn writes_content_byte_for_byte_with_nested_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        apply_changes(
            temp.path(),
            &[change("app/contact/page.tsx", "export default 1;\n")],
        )
        .expect("apply");

        let written = fs::read_to_string(temp.path().join("app/contact/page.tsx")).expect("read");
        assert_eq!(written, "export default 1;\n");
    }

    #[test]
    fn rejects_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(apply_changes(temp.path(), &[change("../evil.txt", "x")]).is_err());
        assert!(apply_changes(temp.path(), &[change("/etc/evil.txt", "x")]).is_err());
    }

    #[test]
    fn rename_proposal_moves_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        apply_changes(
            temp.path(),
            &[change("__tests__/unit/Old.test.ts", "old\n")],
        )
        .expect("seed");

        apply_test_proposals(
            temp.path(),
            &[TestProposal {
                path: "__tests__/unit/New.test.ts".to_string(),
                test_content: "new\n".to_string(),
                action: ProposalAction::Rename,
                old_path: "__tests__/unit/Old.test.ts".to_string(),
            }],
        )
        .expect("apply");

        assert!(!temp.path().join("__tests__/unit/Old.test.ts").exists());
        let written =
            fs::read_to_string(temp.path().join("__tests__/unit/New.test.ts")).expect("read");
        assert_eq!(written, "new\n");
    }

    #[test]
    fn existing_tests_only_match_the_naming_convention() {
        let temp = tempfile::tempdir().expect("tempdir");
        apply_changes(
            temp.path(),
            &[
                change("__tests__/unit/Widget.test.tsx", "w\n"),
                change("__tests__/unit/helper.ts", "h\n"),
                change("__tests__/unit/nested/format.test.ts", "f\n"),
            ],
        )
        .expect("seed");

        let files = existing_test_files(temp.path()).expect("scan");
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "__tests__/unit/Widget.test.tsx",
                "__tests__/unit/nested/format.test.ts",
            ]
        );
    }

    #[test]
    fn missing_test_root_yields_empty_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(existing_test_files(temp.path()).expect("scan").is_empty());
    }
}
