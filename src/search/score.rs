//! Query compilation and substring/subsequence scoring.

pub const WEIGHT_NAME: i64 = 4000;
pub const WEIGHT_SHORT: i64 = 2500;
pub const WEIGHT_PATH: i64 = 1000;

/// A compiled query: the original-case text with `*` and spaces stripped,
/// plus its lower-cased form. An empty compiled query is the all-match
/// query.
pub struct Query {
    pub original: String,
    pub lower: String,
}

impl Query {
    pub fn compile(raw: &str) -> Query {
        let stripped: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '*' && !c.is_whitespace())
            .collect();
        let lower = stripped.to_lowercase();
        Query {
            original: stripped,
            lower,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }
}

fn is_boundary_byte(prev: Option<char>, cur: char, prev_was_lower: bool) -> bool {
    match prev {
        None => true,
        Some(p) => matches!(p, '/' | '\\' | '-' | '_' | '.') || (prev_was_lower && cur.is_uppercase()),
    }
}

/// Positions (char indices) in `field` that are word-start boundaries: the
/// first character, a character after one of `/ \ - _ .`, or a
/// lowercase→uppercase transition in the original casing.
fn boundary_positions(field: &str) -> Vec<bool> {
    let chars: Vec<char> = field.chars().collect();
    let mut out = vec![false; chars.len()];
    for i in 0..chars.len() {
        let prev = if i == 0 { None } else { Some(chars[i - 1]) };
        let prev_was_lower = i > 0 && chars[i - 1].is_lowercase();
        out[i] = is_boundary_byte(prev, chars[i], prev_was_lower);
    }
    out
}

/// Best score for `field` against the compiled `query`, or `None` if the
/// field does not match as either a substring or a boundary-respecting
/// subsequence. `field_is_name` enables the exact-equality bonus.
pub fn score_field(field: &str, query: &Query, field_is_name: bool) -> Option<i64> {
    if query.is_empty() {
        return Some(0);
    }

    let field_lower = field.to_lowercase();
    let boundaries = boundary_positions(field);
    let field_chars: Vec<char> = field.chars().collect();
    let query_len = query.lower.chars().count() as i64;
    let field_len = field_chars.len() as i64;

    let mut best: Option<i64> = None;

    if let Some(idx) = substring_index(&field_lower, &query.lower) {
        let mut score = 2000i64;
        score += (300 - idx as i64).max(0).min(300);
        if boundaries.get(idx).copied().unwrap_or(false) {
            score += 200;
        }
        if idx == 0 {
            score += 150;
        }
        let end = idx + query.lower.chars().count();
        if boundaries.get(end).copied().unwrap_or(false) {
            score += 60;
        }
        score -= (field_len - query_len).max(0);

        if field_is_name && field_lower == query.lower {
            score += 800;
        }

        best = Some(score);
    }

    if let Some(sub_score) = subsequence_score(&field_chars, &boundaries, &query.lower) {
        best = Some(best.map_or(sub_score, |b| b.max(sub_score)));
    }

    best
}

fn substring_index(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    // Byte-index find, then translate to a char index for boundary lookups.
    let byte_idx = haystack.find(needle)?;
    Some(haystack[..byte_idx].chars().count())
}

fn subsequence_score(field_chars: &[char], boundaries: &[bool], query_lower: &str) -> Option<i64> {
    let query_chars: Vec<char> = query_lower.chars().collect();
    if query_chars.is_empty() {
        return None;
    }

    let mut qi = 0usize;
    let mut first_match: Option<usize> = None;
    let mut last_match: usize = 0;
    let mut boundary_hits = 0i64;

    for (i, &c) in field_chars.iter().enumerate() {
        if qi >= query_chars.len() {
            break;
        }
        if c.to_lowercase().next() == Some(query_chars[qi]) {
            if first_match.is_none() {
                first_match = Some(i);
            }
            last_match = i;
            if boundaries.get(i).copied().unwrap_or(false) {
                boundary_hits += 1;
            }
            qi += 1;
        }
    }

    if qi < query_chars.len() {
        return None;
    }

    let first = first_match.unwrap_or(0);
    let span = (last_match - first + 1) as i64;
    let min_span = query_chars.len() as i64;

    let mut score = 1000i64;
    score += 40 * boundary_hits;
    score += (120 - first as i64).max(0).min(120);
    score -= 6 * (span - min_span).max(0);
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_strips_wildcards_and_whitespace() {
        let q = Query::compile("  fo o*bar  ");
        assert_eq!(q.original, "foobar");
        assert_eq!(q.lower, "foobar");
    }

    #[test]
    fn empty_query_matches_everything_with_zero_score() {
        let q = Query::compile("   ");
        assert_eq!(score_field("anything.rs", &q, true), Some(0));
    }

    #[test]
    fn substring_match_at_index_zero_scores_higher_than_mid_string() {
        let q = Query::compile("bar");
        let at_start = score_field("bar_helper.go", &q, true).unwrap();
        let mid = score_field("foobar.go", &q, false).unwrap();
        assert!(at_start > mid);
    }

    #[test]
    fn exact_name_equality_gets_bonus() {
        let q = Query::compile("bar");
        let exact = score_field("bar", &q, true).unwrap();
        let prefix_only = score_field("bar_helper.go", &q, true).unwrap();
        assert!(exact > prefix_only);
    }

    #[test]
    fn subsequence_respects_word_boundaries() {
        let q = Query::compile("fb");
        // "fb" only matches as a subsequence here (f...b), both at boundaries.
        let boundary_hit = score_field("foo_bar", &q, false);
        assert!(boundary_hit.is_some());
    }

    #[test]
    fn no_match_returns_none() {
        let q = Query::compile("zzz");
        assert_eq!(score_field("alpha.rs", &q, false), None);
    }
}
