//! File-reading collaborator for `injectFiles`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::messages::InjectedBlock;

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parses `"/abs/path"` or `"/abs/path:<start>-<end>"` (zero-based,
/// inclusive) into a path and an optional line range.
fn parse_spec(spec: &str) -> (PathBuf, Option<(usize, usize)>) {
    if let Some(idx) = spec.rfind(':') {
        let (path_part, range_part) = spec.split_at(idx);
        let range_part = &range_part[1..];
        if let Some((s, e)) = range_part.split_once('-') {
            if let (Ok(start), Ok(end)) = (s.parse::<usize>(), e.parse::<usize>()) {
                return (PathBuf::from(path_part), Some((start, end)));
            }
        }
    }
    (PathBuf::from(spec), None)
}

fn language_tag(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("ts") | Some("tsx") => "typescript",
        Some("js") | Some("jsx") => "javascript",
        Some("py") => "python",
        Some("go") => "go",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some(other) => other,
        None => "",
    }
    .to_string()
}

/// Reads one `injectFiles` entry and formats it as a numbered, fenced block.
pub fn read_block(spec: &str) -> Result<InjectedBlock, InjectError> {
    let (path, range) = parse_spec(spec);
    let bytes = std::fs::read(&path)?;
    let text = String::from_utf8(bytes).map_err(|_| InjectError::NotUtf8(path.clone()))?;

    let lines: Vec<&str> = text.lines().collect();
    let last = lines.len().saturating_sub(1);
    let (start, end) = range.unwrap_or((0, last));
    let end = end.min(last);

    let mut numbered = String::new();
    for (i, line) in lines.iter().enumerate().take(end + 1).skip(start) {
        let _ = writeln!(numbered, "{:>5} | {}", i + 1, line);
    }

    Ok(InjectedBlock {
        path: path.to_string_lossy().to_string(),
        language: language_tag(&path),
        text: numbered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_line_range_with_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.rs");
        std::fs::write(&file, "one\ntwo\nthree\nfour\n").unwrap();
        let spec = format!("{}:1-2", file.display());

        let block = read_block(&spec).unwrap();
        assert_eq!(block.language, "rust");
        assert!(block.text.contains("    2 | two"));
        assert!(block.text.contains("    3 | three"));
        assert!(!block.text.contains("one"));
    }

    #[test]
    fn no_range_reads_whole_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("b.txt");
        std::fs::write(&file, "x\ny\n").unwrap();

        let block = read_block(&file.to_string_lossy()).unwrap();
        assert!(block.text.contains("    1 | x"));
        assert!(block.text.contains("    2 | y"));
    }

    #[test]
    fn non_utf8_file_is_reported_as_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("bin.dat");
        std::fs::write(&file, [0xff, 0xfe, 0x00, 0xff]).unwrap();

        let err = read_block(&file.to_string_lossy()).unwrap_err();
        assert!(matches!(err, InjectError::NotUtf8(_)));
    }
}
