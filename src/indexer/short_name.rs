//! Short display-name disambiguation.

use std::collections::HashMap;

use super::Entry;

/// Compute a `Short` for every entry, indexed the same as `entries`.
///
/// Entries with a unique base name get that base name. Entries that share a
/// base name are disambiguated by prefixing increasingly many trailing
/// parent-path segments until each key is unique within the group; entries
/// still tied at the deepest possible depth fall back to their full relative
/// path.
pub fn compute_short_names(entries: &[Entry]) -> Vec<String> {
    let mut short = vec![String::new(); entries.len()];

    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, e) in entries.iter().enumerate() {
        groups.entry(e.name.as_str()).or_default().push(i);
    }

    for (name, idxs) in groups {
        if idxs.len() == 1 {
            short[idxs[0]] = name.to_string();
            continue;
        }

        let parent_segs: Vec<Vec<&str>> = idxs
            .iter()
            .map(|&i| {
                let path = entries[i].path.as_str();
                match path.rsplit_once('/') {
                    Some((parent, _)) => parent.split('/').collect(),
                    None => Vec::new(),
                }
            })
            .collect();

        let max_depth = parent_segs.iter().map(Vec::len).max().unwrap_or(0);
        let mut unresolved: Vec<usize> = (0..idxs.len()).collect();

        for d in 1..=max_depth {
            if unresolved.is_empty() {
                break;
            }

            let mut counts: HashMap<String, usize> = HashMap::new();
            let mut keys: HashMap<usize, String> = HashMap::new();
            for &u in &unresolved {
                let segs = &parent_segs[u];
                let take = segs.len().min(d);
                let tail = &segs[segs.len() - take..];
                let mut key = tail.join("/");
                if !key.is_empty() {
                    key.push('/');
                }
                key.push_str(name);
                *counts.entry(key.clone()).or_insert(0) += 1;
                keys.insert(u, key);
            }

            let mut still_unresolved = Vec::new();
            for &u in &unresolved {
                let key = &keys[&u];
                if counts[key] == 1 {
                    short[idxs[u]] = key.clone();
                } else {
                    still_unresolved.push(u);
                }
            }
            unresolved = still_unresolved;
        }

        for u in unresolved {
            short[idxs[u]] = entries[idxs[u]].path.clone();
        }
    }

    short
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> Entry {
        let name = path.rsplit('/').next().unwrap().to_string();
        Entry {
            path: path.to_string(),
            name,
            is_dir: false,
            short: String::new(),
        }
    }

    #[test]
    fn unique_names_use_base_name() {
        let entries = vec![entry("src/main.rs"), entry("docs/readme.md")];
        let short = compute_short_names(&entries);
        assert_eq!(short, vec!["main.rs".to_string(), "readme.md".to_string()]);
    }

    #[test]
    fn scenario_a_duplicate_disambiguation() {
        let entries = vec![entry("a/b/util.x"), entry("c/d/util.x")];
        let short = compute_short_names(&entries);
        assert_eq!(short[0], "b/util.x");
        assert_eq!(short[1], "d/util.x");
    }

    #[test]
    fn collision_resolves_at_deeper_depth() {
        let entries = vec![entry("x/util.go"), entry("a/x/util.go")];
        let short = compute_short_names(&entries);
        assert_eq!(short[0], "x/util.go");
        assert_eq!(short[1], "a/x/util.go");
    }

    #[test]
    fn three_siblings_resolve_at_first_parent_segment() {
        let entries = vec![
            entry("p/q/dup.rs"),
            entry("p/r/dup.rs"),
            entry("p/dup.rs"),
        ];
        let short = compute_short_names(&entries);
        // All resolve by depth 2 at the latest since parent chains diverge.
        assert_eq!(short[0], "q/dup.rs");
        assert_eq!(short[1], "r/dup.rs");
        assert_eq!(short[2], "p/dup.rs");
    }
}
