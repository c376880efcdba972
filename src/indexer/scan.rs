//! Full and incremental filesystem scans.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::ignore_eval::RuleChain;

use super::short_name::compute_short_names;
use super::Entry;

/// Depth-first traversal from `root`, returning every surviving entry sorted
/// by path with short names computed.
pub fn full_scan(root: &Path) -> Vec<Entry> {
    let root_chain = RuleChain::empty().descend(root, ".");
    let mut entries = Vec::new();
    scan_children(root, "", &root_chain, &mut entries);
    finish(&mut entries);
    entries
}

/// Walk `dir`'s children, appending surviving entries to `out`. `chain` is
/// the rule chain inherited from `dir`'s parent (i.e. `dir`'s own
/// `.gitignore`, if any, has not yet been folded in — that happens once a
/// child directory is confirmed to survive).
fn scan_children(dir: &Path, rel_dir: &str, chain: &RuleChain, out: &mut Vec<Entry>) {
    let mut stack = vec![(dir.to_path_buf(), rel_dir.to_string(), chain.clone())];

    while let Some((dir, rel_dir, chain)) = stack.pop() {
        let read_dir = match fs::read_dir(&dir) {
            Ok(r) => r,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for item in read_dir {
            let item = match item {
                Ok(i) => i,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let name = item.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }

            let file_type = match item.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            let is_dir = file_type.is_dir();

            let child_rel = if rel_dir.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_dir, name)
            };

            if chain.is_ignored(&child_rel, is_dir) {
                continue;
            }

            out.push(Entry {
                path: child_rel.clone(),
                name: name.clone(),
                is_dir,
                short: String::new(),
            });

            if is_dir {
                let abs_child = dir.join(&name);
                let child_chain = chain.descend(&abs_child, &child_rel);
                stack.push((abs_child, child_rel, child_chain));
            }
        }
    }
}

fn finish(entries: &mut Vec<Entry>) {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let shorts = compute_short_names(entries);
    for (e, s) in entries.iter_mut().zip(shorts) {
        e.short = s;
    }
}

/// Rebuild the rule chain that would be in effect for `rel_dir`, by
/// re-reading each ancestor's `.gitignore` from root down. Cheap relative to
/// a full scan since it is only invoked for the handful of directories named
/// in one incremental batch.
fn rule_chain_for(root: &Path, rel_dir: &str) -> RuleChain {
    let mut chain = RuleChain::empty().descend(root, ".");
    if rel_dir.is_empty() {
        return chain;
    }
    let mut acc = String::new();
    for seg in rel_dir.split('/') {
        if acc.is_empty() {
            acc.push_str(seg);
        } else {
            acc.push('/');
            acc.push_str(seg);
        }
        chain = chain.descend(&root.join(&acc), &acc);
    }
    chain
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

pub enum ApplyOutcome {
    Applied(Vec<Entry>),
    NeedsFullScan,
}

/// Apply a batch of root-relative changed paths (the keys of `PendingEvents`)
/// against `prev`, the previously published entries. Returns
/// `NeedsFullScan` whenever any changed path is a `.gitignore` file.
pub fn incremental_apply(
    root: &Path,
    prev: &[Entry],
    pending_paths: &[String],
) -> ApplyOutcome {
    if pending_paths
        .iter()
        .any(|p| Path::new(p).file_name().map(|n| n == ".gitignore").unwrap_or(false))
    {
        return ApplyOutcome::NeedsFullScan;
    }

    let mut by_path: BTreeMap<String, Entry> =
        prev.iter().cloned().map(|e| (e.path.clone(), e)).collect();

    let mut dirs_to_rescan: BTreeSet<String> = BTreeSet::new();
    let mut files_to_check: BTreeSet<String> = BTreeSet::new();
    let mut dirs_removed: BTreeSet<String> = BTreeSet::new();
    let mut files_removed: BTreeSet<String> = BTreeSet::new();

    for path in pending_paths {
        let abs = root.join(path);
        match fs::symlink_metadata(&abs) {
            Ok(meta) if meta.is_dir() => {
                dirs_to_rescan.insert(path.clone());
            }
            Ok(_) => {
                files_to_check.insert(path.clone());
            }
            Err(_) => {
                let had_children = by_path.keys().any(|p| is_under(p, path));
                let was_dir = by_path.get(path).map(|e| e.is_dir).unwrap_or(false);
                if had_children || was_dir {
                    dirs_removed.insert(path.clone());
                } else if by_path.contains_key(path) {
                    files_removed.insert(path.clone());
                }
            }
        }
    }

    files_to_check.retain(|p| !dirs_to_rescan.iter().any(|d| is_under(p, d)));
    files_removed.retain(|p| !dirs_to_rescan.iter().any(|d| is_under(p, d)));

    by_path.retain(|p, _| {
        let under_rescan = dirs_to_rescan.iter().any(|d| p == d || is_under(p, d));
        let under_removed = dirs_removed.iter().any(|d| p == d || is_under(p, d));
        !under_rescan && !under_removed && !files_removed.contains(p)
    });

    for dir_rel in &dirs_to_rescan {
        let parent_rel = parent_of(dir_rel);
        let parent_chain = rule_chain_for(root, parent_rel);
        if parent_chain.is_ignored(dir_rel, true) {
            continue;
        }

        let name = dir_rel.rsplit('/').next().unwrap_or(dir_rel).to_string();
        by_path.entry(dir_rel.clone()).or_insert(Entry {
            path: dir_rel.clone(),
            name,
            is_dir: true,
            short: String::new(),
        });

        let abs_dir = root.join(dir_rel);
        let own_chain = parent_chain.descend(&abs_dir, dir_rel);
        let mut collected = Vec::new();
        scan_children(&abs_dir, dir_rel, &own_chain, &mut collected);
        for e in collected {
            by_path.insert(e.path.clone(), e);
        }
    }

    for file_rel in &files_to_check {
        let abs = root.join(file_rel);
        if let Ok(meta) = fs::symlink_metadata(&abs) {
            let chain = rule_chain_for(root, parent_of(file_rel));
            let is_dir = meta.is_dir();
            if !chain.is_ignored(file_rel, is_dir) {
                let name = file_rel.rsplit('/').next().unwrap_or(file_rel).to_string();
                by_path.insert(
                    file_rel.clone(),
                    Entry {
                        path: file_rel.clone(),
                        name,
                        is_dir,
                        short: String::new(),
                    },
                );
            }
        }
    }

    let mut entries: Vec<Entry> = by_path.into_values().collect();
    finish(&mut entries);
    ApplyOutcome::Applied(entries)
}
