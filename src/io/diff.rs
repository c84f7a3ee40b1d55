//! Diff extraction for the two review ranges.
//!
//! `partial` covers the latest commit only (`HEAD~1..HEAD`); `full` covers
//! everything the run produced (`merge-base..HEAD`). Both parse the unified
//! diff into per-file records while preserving the patch text verbatim.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument};

use crate::core::types::FileDiff;
use crate::io::git::Git;

/// Sentinel commit message when HEAD is a root commit and no `HEAD~1` exists.
pub const ROOT_COMMIT_MESSAGE: &str = "(initial commit)";

/// Patch text plus the commit messages covering the same range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBundle {
    pub patch: String,
    pub messages: Vec<String>,
}

/// Diff for the most recent single commit.
///
/// A root commit yields an empty patch with the sentinel message, so callers
/// never reference `HEAD~1` when it does not exist.
#[instrument(skip_all)]
pub fn partial(git: &Git) -> Result<DiffBundle> {
    if !git.head_has_parent()? {
        debug!("HEAD has no parent, returning empty partial diff");
        return Ok(DiffBundle {
            patch: String::new(),
            messages: vec![ROOT_COMMIT_MESSAGE.to_string()],
        });
    }
    let patch = git.diff_full_context("HEAD~1", "HEAD")?;
    let message = git.last_commit_message()?;
    Ok(DiffBundle {
        patch,
        messages: vec![message],
    })
}

/// Diff from the merge-base with the base branch to HEAD.
///
/// Falls back from `origin/<base>` to the local base branch; when neither
/// resolves, the range degenerates to `HEAD..HEAD` (empty diff).
#[instrument(skip_all, fields(base))]
pub fn full(git: &Git, base: &str) -> Result<DiffBundle> {
    let merge_base = resolve_merge_base(git, base)?;
    let patch = git.diff_full_context(&merge_base, "HEAD")?;
    let messages = git.commit_messages_since(&merge_base)?;
    Ok(DiffBundle { patch, messages })
}

fn resolve_merge_base(git: &Git, base: &str) -> Result<String> {
    for candidate in [format!("origin/{base}"), base.to_string()] {
        if let Some(mb) = git.merge_base("HEAD", &candidate)? {
            debug!(merge_base = %mb, candidate = %candidate, "resolved merge base");
            return Ok(mb);
        }
    }
    debug!("no merge base with {base}, falling back to HEAD (empty diff)");
    Ok("HEAD".to_string())
}

static FILE_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^diff --git ").expect("file header regex"));

/// Split a unified diff into per-file records.
///
/// Splits on `diff --git` headers and extracts the post-image path from the
/// `+++ b/` line (falling back to the `--- a/` line for deletions). Patch
/// text is preserved verbatim in each record.
pub fn parse_file_diffs(patch: &str) -> Vec<FileDiff> {
    let mut starts: Vec<usize> = FILE_HEADER_RE.find_iter(patch).map(|m| m.start()).collect();
    starts.push(patch.len());

    let mut out = Vec::new();
    for window in starts.windows(2) {
        let chunk = &patch[window[0]..window[1]];
        if let Some(diff) = parse_file_chunk(chunk) {
            out.push(diff);
        }
    }
    out
}

fn parse_file_chunk(chunk: &str) -> Option<FileDiff> {
    let mut post_image: Option<String> = None;
    let mut pre_image: Option<String> = None;
    let mut status: Option<String> = None;
    let mut additions = 0u32;
    let mut deletions = 0u32;

    for line in chunk.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            post_image = strip_image_prefix(rest, "b/");
        } else if let Some(rest) = line.strip_prefix("--- ") {
            pre_image = strip_image_prefix(rest, "a/");
        } else if line.starts_with("new file mode") {
            status = Some("added".to_string());
        } else if line.starts_with("deleted file mode") {
            status = Some("deleted".to_string());
        } else if line.starts_with("rename to ") {
            status = Some("renamed".to_string());
        } else if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }

    let path = post_image.or(pre_image)?;
    Some(FileDiff {
        path,
        raw_patch: chunk.to_string(),
        status: Some(status.unwrap_or_else(|| "modified".to_string())),
        additions: Some(additions),
        deletions: Some(deletions),
        content: None,
        excluded: false,
    })
}

/// `b/app/page.tsx` -> `app/page.tsx`; `/dev/null` -> `None`.
fn strip_image_prefix(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.trim();
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    const SAMPLE_PATCH: &str = "\
diff --git a/app/contact/page.tsx b/app/contact/page.tsx
new file mode 100644
index 0000000..3b2e1c4
--- /dev/null
+++ b/app/contact/page.tsx
@@ -0,0 +1,3 @@
+export default function ContactPage() {
+  return <h1>Contact</h1>;
+}
diff --git a/lib/old.ts b/lib/old.ts
deleted file mode 100644
index 9daeafb..0000000
--- a/lib/old.ts
+++ /dev/null
@@ -1,1 +0,0 @@
-export {};
";

    #[test]
    fn parses_added_and_deleted_files() {
        let diffs = parse_file_diffs(SAMPLE_PATCH);
        assert_eq!(diffs.len(), 2);

        assert_eq!(diffs[0].path, "app/contact/page.tsx");
        assert_eq!(diffs[0].status.as_deref(), Some("added"));
        assert_eq!(diffs[0].additions, Some(3));
        assert!(diffs[0].raw_patch.starts_with("diff --git a/app/contact/page.tsx"));

        assert_eq!(diffs[1].path, "lib/old.ts");
        assert_eq!(diffs[1].status.as_deref(), Some("deleted"));
        assert_eq!(diffs[1].deletions, Some(1));
    }

    #[test]
    fn empty_patch_parses_to_no_files() {
        assert!(parse_file_diffs("").is_empty());
    }

    #[test]
    fn partial_on_root_commit_is_empty_with_sentinel() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());

        let bundle = partial(&git).expect("partial");
        assert!(bundle.patch.is_empty());
        assert_eq!(bundle.messages, vec![ROOT_COMMIT_MESSAGE.to_string()]);
    }

    #[test]
    fn partial_covers_exactly_the_last_commit() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());

        fs::create_dir_all(repo.root().join("app")).expect("mkdir");
        fs::write(repo.root().join("app/a.ts"), "export const a = 1;\n").expect("write");
        git.add_all().expect("add");
        git.commit_staged("Step 1: a").expect("commit");
        fs::write(repo.root().join("app/b.ts"), "export const b = 2;\n").expect("write");
        git.add_all().expect("add");
        git.commit_staged("Step 2: b").expect("commit");

        let bundle = partial(&git).expect("partial");
        let diffs = parse_file_diffs(&bundle.patch);
        let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["app/b.ts"]);
        assert_eq!(bundle.messages, vec!["Step 2: b".to_string()]);
    }

    #[test]
    fn full_covers_the_whole_branch_range() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        git.switch_to_branch("agent/full", "main").expect("switch");

        fs::write(repo.root().join("one.ts"), "1\n").expect("write");
        git.add_all().expect("add");
        git.commit_staged("Step 1: one").expect("commit");
        fs::write(repo.root().join("two.ts"), "2\n").expect("write");
        git.add_all().expect("add");
        git.commit_staged("Step 2: two").expect("commit");

        let bundle = full(&git, "main").expect("full");
        let diffs = parse_file_diffs(&bundle.patch);
        let mut paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["one.ts", "two.ts"]);
        assert_eq!(bundle.messages.len(), 2);
    }

    #[test]
    fn full_without_base_degenerates_to_empty() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());

        let bundle = full(&git, "no-such-branch").expect("full");
        assert!(bundle.patch.is_empty());
        assert!(bundle.messages.is_empty());
    }
}
