//! Worktree guardrail injection.
//!
//! Sessions launched into an isolated git worktree get a marker-delimited
//! block inside `<working_dir>/.claude/CLAUDE.md` naming the branch, the
//! main repo path, and the branch-switching commands the agent must not
//! run. Re-launching replaces only the managed block; never injected when
//! the working directory is the repo root or does not exist.

use std::io;
use std::path::Path;
use tracing::debug;

use switchboard_core::session::WorktreeInfo;

/// Start sentinel of the managed block.
pub const GUARDRAILS_START: &str = "<!-- WORKTREE_GUARDRAILS_START -->";
/// End sentinel of the managed block.
pub const GUARDRAILS_END: &str = "<!-- WORKTREE_GUARDRAILS_END -->";

/// Write (or replace in place) the guardrail block.
///
/// Returns `false` without touching the filesystem when injection is not
/// applicable: working directory equals the repo root, or it does not
/// exist.
///
/// # Errors
///
/// Propagates filesystem errors from creating `.claude/` or writing the
/// file.
pub fn inject_guardrails(working_dir: &Path, info: &WorktreeInfo) -> io::Result<bool> {
    if working_dir == info.repo_root {
        debug!(dir = %working_dir.display(), "skipping guardrails: working dir is repo root");
        return Ok(false);
    }
    if !working_dir.exists() {
        debug!(dir = %working_dir.display(), "skipping guardrails: working dir missing");
        return Ok(false);
    }

    let claude_dir = working_dir.join(".claude");
    std::fs::create_dir_all(&claude_dir)?;
    let marker_path = claude_dir.join("CLAUDE.md");

    let existing = match std::fs::read_to_string(&marker_path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let updated = replace_managed_block(&existing, &guardrail_block(info));
    std::fs::write(&marker_path, updated)?;
    Ok(true)
}

/// The managed block, sentinels included.
fn guardrail_block(info: &WorktreeInfo) -> String {
    let mut block = String::new();
    block.push_str(GUARDRAILS_START);
    block.push_str("\n# Worktree guardrails\n\n");
    if info.actual_branch == info.requested_branch {
        block.push_str(&format!("You are on branch `{}`.\n", info.actual_branch));
    } else {
        block.push_str(&format!(
            "You are on branch `{}` (parent branch `{}`).\n",
            info.actual_branch, info.requested_branch
        ));
    }
    block.push_str(&format!(
        "This is an isolated git worktree of `{}`.\n\n",
        info.repo_root.display()
    ));
    block.push_str(
        "Do NOT switch branches. The following commands are forbidden here:\n\
         - `git checkout`\n\
         - `git switch`\n\
         - `git worktree remove`\n\
         - `git branch -d` / `git branch -D`\n",
    );
    block.push_str(GUARDRAILS_END);
    block
}

/// Replace the delimited section, or append the block when no sentinels
/// are present. Content outside the sentinels is untouched.
fn replace_managed_block(existing: &str, block: &str) -> String {
    if let (Some(start), Some(end)) = (
        existing.find(GUARDRAILS_START),
        existing.find(GUARDRAILS_END),
    ) {
        if end >= start {
            let after = end.saturating_add(GUARDRAILS_END.len());
            let mut out = String::with_capacity(existing.len());
            out.push_str(&existing[..start]);
            out.push_str(block);
            out.push_str(&existing[after..]);
            return out;
        }
    }
    if existing.is_empty() {
        let mut out = String::from(block);
        out.push('\n');
        return out;
    }
    let mut out = String::from(existing);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(block);
    out.push('\n');
    out
}
