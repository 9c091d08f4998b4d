/// Workspace document service.
///
/// Threads are anchored to a (file, line-range) pair. The workspace owns the
/// live line buffers for every opened file and is the single authority for
/// resolving an anchor to text and for rewriting an anchored range. Anchored
/// text is always read from the live buffer at call time — if the buffer has
/// changed since the thread was created, the new text wins.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

// ── Line ranges ───────────────────────────────────────────────────────────────

/// Inclusive 0-based line range within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn single(line: usize) -> Self {
        Self { start: line, end: line }
    }

    pub fn contains(&self, line: usize) -> bool {
        line >= self.start && line <= self.end
    }

    /// Parse a 1-based `A-B` or single-line `A` argument as given on the
    /// command line.
    pub fn parse_1based(s: &str) -> std::result::Result<Self, String> {
        let one = |p: &str| -> std::result::Result<usize, String> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| format!("invalid line number '{}'", p.trim()))?;
            if n == 0 {
                return Err("line numbers are 1-based".to_string());
            }
            Ok(n - 1)
        };
        match s.split_once('-') {
            Some((a, b)) => Ok(Self::new(one(a)?, one(b)?)),
            None => Ok(Self::single(one(s)?)),
        }
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 1-based for humans
        if self.start == self.end {
            write!(f, "L{}", self.start + 1)
        } else {
            write!(f, "L{}-{}", self.start + 1, self.end + 1)
        }
    }
}

// ── Anchor ────────────────────────────────────────────────────────────────────

/// What a thread is pinned to: one line range in one file. Immutable for the
/// life of the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub path: PathBuf,
    pub range: LineRange,
}

impl Anchor {
    pub fn new(path: impl Into<PathBuf>, range: LineRange) -> Self {
        Self { path: path.into(), range }
    }
}

// ── Host trait ────────────────────────────────────────────────────────────────

/// The document side of the orchestrators, kept narrow so tests can substitute
/// a scripted host. `anchored_text` returning `None` means "no editor/document
/// available" and aborts the calling flow before any thread mutation.
pub trait DocumentHost {
    fn anchored_text(&self, anchor: &Anchor) -> Option<String>;
    fn replace_range(&mut self, anchor: &Anchor, text: &str) -> Result<()>;
}

// ── Document ──────────────────────────────────────────────────────────────────

/// One open file: path + line buffer. Line endings are normalised to `\n` on
/// load; a trailing newline is restored on save.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        let lines = raw.replace("\r\n", "\n").lines().map(str::to_string).collect();
        Ok(Self { path: path.to_path_buf(), lines })
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Text of `range`, clamped to the buffer. `None` when the buffer is empty
    /// or the range starts past the end.
    pub fn range_text(&self, range: LineRange) -> Option<String> {
        if self.lines.is_empty() || range.start >= self.lines.len() {
            return None;
        }
        let end = range.end.min(self.lines.len() - 1);
        Some(self.lines[range.start..=end].join("\n"))
    }

    /// Replace `range` with `text` in one splice. Returns the text that was
    /// replaced. The range is clamped the same way as `range_text`.
    pub fn splice(&mut self, range: LineRange, text: &str) -> Option<String> {
        if self.lines.is_empty() || range.start >= self.lines.len() {
            return None;
        }
        let end = range.end.min(self.lines.len() - 1);
        let old = self.lines[range.start..=end].join("\n");
        let new_lines: Vec<String> = text.lines().map(str::to_string).collect();
        self.lines.splice(range.start..=end, new_lines);
        Some(old)
    }

    fn save(&self) -> Result<()> {
        let mut out = self.lines.join("\n");
        out.push('\n');
        fs::write(&self.path, out)
            .with_context(|| format!("cannot write '{}'", self.path.display()))
    }
}

// ── Undo records ──────────────────────────────────────────────────────────────

/// One applied rewrite, kept so the user can roll it back. The stored range is
/// where the *new* text landed, so undo can splice the old text back in.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub path: PathBuf,
    pub applied_range: LineRange,
    pub previous_text: String,
}

// ── Workspace ─────────────────────────────────────────────────────────────────

/// All open documents plus the undo stack for AI rewrites.
#[derive(Default)]
pub struct Workspace {
    docs: HashMap<PathBuf, Document>,
    undo: Vec<EditRecord>,
}

impl Workspace {
    pub fn open(&mut self, path: &Path) -> Result<&Document> {
        if !self.docs.contains_key(path) {
            let doc = Document::load(path)?;
            self.docs.insert(path.to_path_buf(), doc);
        }
        Ok(&self.docs[path])
    }

    pub fn document(&self, path: &Path) -> Option<&Document> {
        self.docs.get(path)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Roll back the most recent rewrite. Returns the path that was restored.
    pub fn undo_last_edit(&mut self) -> Result<Option<PathBuf>> {
        let Some(record) = self.undo.pop() else {
            return Ok(None);
        };
        let doc = self
            .docs
            .get_mut(&record.path)
            .with_context(|| format!("'{}' is no longer open", record.path.display()))?;
        doc.splice(record.applied_range, &record.previous_text);
        doc.save()?;
        Ok(Some(record.path))
    }
}

impl DocumentHost for Workspace {
    fn anchored_text(&self, anchor: &Anchor) -> Option<String> {
        self.docs.get(&anchor.path)?.range_text(anchor.range)
    }

    fn replace_range(&mut self, anchor: &Anchor, text: &str) -> Result<()> {
        let doc = self
            .docs
            .get_mut(&anchor.path)
            .with_context(|| format!("'{}' is not open", anchor.path.display()))?;
        let old = doc
            .splice(anchor.range, text)
            .with_context(|| format!("range {} is outside '{}'", anchor.range, anchor.path.display()))?;
        doc.save()?;
        let applied_len = text.lines().count().max(1);
        self.undo.push(EditRecord {
            path: anchor.path.clone(),
            applied_range: LineRange::new(anchor.range.start, anchor.range.start + applied_len - 1),
            previous_text: old,
        });
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn range_text_resolves_inclusive_lines() {
        let f = temp_file("alpha\nbeta\ngamma\ndelta\n");
        let doc = Document::load(f.path()).unwrap();
        assert_eq!(doc.range_text(LineRange::new(1, 2)).unwrap(), "beta\ngamma");
        assert_eq!(doc.range_text(LineRange::single(0)).unwrap(), "alpha");
    }

    #[test]
    fn range_text_clamps_end_and_rejects_out_of_range_start() {
        let f = temp_file("one\ntwo\n");
        let doc = Document::load(f.path()).unwrap();
        assert_eq!(doc.range_text(LineRange::new(1, 99)).unwrap(), "two");
        assert!(doc.range_text(LineRange::new(5, 9)).is_none());
    }

    #[test]
    fn replace_range_rewrites_file_and_records_undo() {
        let f = temp_file("fn a() {}\nfn b() {}\nfn c() {}\n");
        let mut ws = Workspace::default();
        ws.open(f.path()).unwrap();
        let anchor = Anchor::new(f.path(), LineRange::single(1));

        ws.replace_range(&anchor, "fn b() { todo!() }\nfn b_helper() {}").unwrap();

        let on_disk = std::fs::read_to_string(f.path()).unwrap();
        assert_eq!(on_disk, "fn a() {}\nfn b() { todo!() }\nfn b_helper() {}\nfn c() {}\n");
        assert_eq!(ws.undo_depth(), 1);

        let restored = ws.undo_last_edit().unwrap();
        assert_eq!(restored.unwrap(), f.path());
        let on_disk = std::fs::read_to_string(f.path()).unwrap();
        assert_eq!(on_disk, "fn a() {}\nfn b() {}\nfn c() {}\n");
        assert_eq!(ws.undo_depth(), 0);
    }

    #[test]
    fn anchored_text_is_read_live_not_cached() {
        let f = temp_file("old line\n");
        let mut ws = Workspace::default();
        ws.open(f.path()).unwrap();
        let anchor = Anchor::new(f.path(), LineRange::single(0));
        assert_eq!(ws.anchored_text(&anchor).unwrap(), "old line");

        ws.replace_range(&anchor, "new line").unwrap();
        assert_eq!(ws.anchored_text(&anchor).unwrap(), "new line");
    }

    #[test]
    fn anchored_text_for_unopened_file_is_none() {
        let ws = Workspace::default();
        let anchor = Anchor::new("/nonexistent/file.rs", LineRange::single(0));
        assert!(ws.anchored_text(&anchor).is_none());
    }

    #[test]
    fn undo_with_empty_stack_is_a_no_op() {
        let mut ws = Workspace::default();
        assert!(ws.undo_last_edit().unwrap().is_none());
    }

    #[test]
    fn line_argument_parses_ranges_and_single_lines() {
        assert_eq!(LineRange::parse_1based("10-30").unwrap(), LineRange::new(9, 29));
        assert_eq!(LineRange::parse_1based("7").unwrap(), LineRange::single(6));
        assert_eq!(LineRange::parse_1based("30-10").unwrap(), LineRange::new(9, 29));
        assert!(LineRange::parse_1based("0").is_err());
        assert!(LineRange::parse_1based("x-3").is_err());
    }
}
