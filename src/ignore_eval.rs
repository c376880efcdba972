//! Anchored gitignore rule chains.
//!
//! Each directory that carries its own `.gitignore` contributes one rule to
//! the chain inherited by its children. Evaluating a path walks the chain in
//! anchor order (root → leaf) and keeps the *last* decisive verdict — a
//! negation in a deeper `.gitignore` can un-ignore a path an ancestor rule
//! ignored, matching `git check-ignore`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// One anchored rule-set: the absolute directory it lives in, its path
/// relative to the indexed root (`.` for the root's own `.gitignore`), and
/// the compiled matcher for that directory's patterns.
pub struct IgnoreRule {
    pub dir: PathBuf,
    pub rel: String,
    matcher: Gitignore,
}

/// The ordered list of rules inherited from root down to one directory.
/// Cloning a chain to descend into a child is an `Arc` clone plus one
/// `Vec` push, not a deep copy of any matcher.
#[derive(Clone)]
pub struct RuleChain(Vec<Arc<IgnoreRule>>);

impl RuleChain {
    /// The chain for the indexed root itself, before any `.gitignore` has
    /// been read.
    pub fn empty() -> Self {
        RuleChain(Vec::new())
    }

    /// Build the rule chain for `dir` (relative to root as `rel`), inheriting
    /// `self` and appending a new rule if `dir/.gitignore` exists and parses.
    /// I/O errors reading the file are treated as "no rule here" rather than
    /// propagated — a missing or unreadable `.gitignore` just means this
    /// directory contributes nothing to the chain.
    pub fn descend(&self, dir: &Path, rel: &str) -> RuleChain {
        let gi_path = dir.join(".gitignore");
        if !gi_path.is_file() {
            return self.clone();
        }

        let mut builder = GitignoreBuilder::new(dir);
        if builder.add(&gi_path).is_some() {
            // add() returns Some(error) on read/parse failure; keep the
            // inherited chain unchanged in that case.
            return self.clone();
        }
        let matcher = match builder.build() {
            Ok(m) => m,
            Err(_) => return self.clone(),
        };

        let mut rules = self.0.clone();
        rules.push(Arc::new(IgnoreRule {
            dir: dir.to_path_buf(),
            rel: rel.to_string(),
            matcher,
        }));
        RuleChain(rules)
    }

    /// Whether `target_rel` (root-relative, forward-slash normalized) is
    /// ignored under this chain. `is_dir` affects directory-only patterns
    /// (e.g. `build/`).
    ///
    /// The directory a rule lives in is never ignored by its own rules: a
    /// rule's matcher is only consulted for paths strictly inside it.
    pub fn is_ignored(&self, target_rel: &str, is_dir: bool) -> bool {
        if is_git_path(target_rel) {
            return true;
        }

        let mut last_ignored = false;
        for rule in &self.0 {
            let suffix = if rule.rel == "." {
                target_rel
            } else if let Some(s) = target_rel.strip_prefix(rule.rel.as_str()) {
                s.trim_start_matches('/')
            } else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }

            match rule.matcher.matched(suffix, is_dir) {
                ignore::Match::Ignore(_) => last_ignored = true,
                ignore::Match::Whitelist(_) => last_ignored = false,
                ignore::Match::None => {}
            }
        }
        last_ignored
    }
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::empty()
    }
}

/// The VCS directory is unconditionally ignored, regardless of any
/// `.gitignore` content.
fn is_git_path(target_rel: &str) -> bool {
    target_rel == ".git" || target_rel.starts_with(".git/")
}
