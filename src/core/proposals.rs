//! Post-processing laws for test proposals.
//!
//! The generator and the repairer both emit [`TestProposal`] lists; their
//! output passes through [`normalize`] before anything touches disk. The laws:
//!
//! 1. Containment: every proposal path lies under the designated test root.
//! 2. Extension correctness: if any changed file with the same base name is a
//!    markup file or carries a markup import, the proposal uses the markup
//!    test extension; otherwise the plain extension.
//! 3. Deduplication: at most one proposal per base name; when both extensions
//!    appear, the markup one wins.

use std::collections::BTreeSet;

use crate::core::types::{FileDiff, ProposalAction, TestProposal};

/// Directory all generated unit tests live under.
pub const TEST_ROOT: &str = "__tests__/unit";

const PLAIN_EXT: &str = "ts";
const MARKUP_EXT: &str = "tsx";

const MARKUP_IMPORT_MARKERS: &[&str] = &[
    "from 'react'",
    "from \"react\"",
    "require('react')",
    "require(\"react\")",
];

/// True when a changed file is markup-bearing: a markup extension, or a plain
/// file that imports the markup library.
pub fn diff_is_markup(diff: &FileDiff) -> bool {
    if let Some(ext) = extension(&diff.path) {
        if ext == "tsx" || ext == "jsx" {
            return true;
        }
    }
    let haystacks = [Some(diff.raw_patch.as_str()), diff.content.as_deref()];
    haystacks.into_iter().flatten().any(|text| {
        MARKUP_IMPORT_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
    })
}

/// Base names (file stems) of all markup-bearing changed files.
pub fn markup_bases(changed_files: &[FileDiff]) -> BTreeSet<String> {
    changed_files
        .iter()
        .filter(|diff| !diff.excluded && diff_is_markup(diff))
        .map(|diff| base_name(&diff.path))
        .collect()
}

/// Apply all three laws to a raw proposal list.
///
/// Rename proposals with an empty or self-referential `old_path` are
/// downgraded to updates; `old_path` is cleared for non-rename actions.
pub fn normalize(proposals: Vec<TestProposal>, changed_files: &[FileDiff]) -> Vec<TestProposal> {
    let markup = markup_bases(changed_files);

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::new();
    for mut proposal in proposals {
        let base = base_name(&proposal.path);
        if base.is_empty() || seen.contains(&base) {
            continue;
        }
        seen.insert(base.clone());

        let ext = if markup.contains(&base) { MARKUP_EXT } else { PLAIN_EXT };
        proposal.path = format!("{TEST_ROOT}/{base}.test.{ext}");

        match proposal.action {
            ProposalAction::Rename => {
                if proposal.old_path.is_empty() || proposal.old_path == proposal.path {
                    proposal.action = ProposalAction::Update;
                    proposal.old_path = String::new();
                }
            }
            ProposalAction::Create | ProposalAction::Update => {
                proposal.old_path = String::new();
            }
        }

        out.push(proposal);
    }
    out
}

/// File stem with any test suffix stripped: `__tests__/unit/Foo.test.tsx` and
/// `components/Foo.tsx` both map to `Foo`.
pub fn base_name(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    for suffix in [".test.tsx", ".test.ts", ".test.jsx", ".test.js"] {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    match file_name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}
