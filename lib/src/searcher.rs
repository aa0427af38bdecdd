/*! Finds matches of a compiled pattern in a text.

The [`Searcher`] drives an [`Engine`] over a [`TextSource`]. For each line,
starting at the requested position, it picks the candidate positions where a
match could start and asks the engine to try a match at each of them. The
optimization hints computed by the compiler are used for discarding lines
and positions where no match can start:

* Anchored patterns (e.g: `^foo`) are tried only at the first position of
  each line.
* When every match starts with a known character, only the positions where
  that character appears are tried.
* When every match contains a known literal, lines that don't contain the
  literal are skipped entirely.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bstr::ByteSlice;
use log::*;

use crate::backtrack::compiler::Hints;
use crate::backtrack::{Program, NSUBEXP};
use crate::classes::{CharClassifier, DefaultClassifier};
use crate::errors::MatchError;
use crate::text::{cell_len, decode_char, Context, Position, Span, TextSource};

/// Default limit for the memory used by the backtracking state.
pub const DEFAULT_MAX_MEM: usize = 1000 * 1024;

/// A matching engine.
///
/// `exec` finds the first match that starts at or after `start`.
pub trait Engine {
    fn exec(
        &self,
        src: &dyn TextSource,
        start: Position,
        cfg: &MatchConfig,
        ctx: &Context,
    ) -> Result<Option<MatchResult>, MatchError>;
}

/// Settings that apply to a single search.
#[derive(Clone)]
pub struct MatchConfig {
    /// Ignore case, unless the pattern contains `\c` or `\C`.
    pub ignore_case: bool,
    /// The search fails with [`MatchError::Timeout`] after this instant.
    pub deadline: Option<Instant>,
    /// The search fails with [`MatchError::Interrupted`] when the flag is
    /// set.
    pub interrupt: Option<Arc<AtomicBool>>,
    /// Maximum number of bytes used by the backtracking state.
    pub max_mem: usize,
    /// Texts matched by `\z1`..`\z9`.
    pub external: ExternalTexts,
    /// Whether the optimization hints are used.
    pub use_hints: bool,
    pub classifier: Arc<dyn CharClassifier>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ignore_case: false,
            deadline: None,
            interrupt: None,
            max_mem: DEFAULT_MAX_MEM,
            external: ExternalTexts::default(),
            use_hints: true,
            classifier: Arc::new(DefaultClassifier::new()),
        }
    }
}

impl MatchConfig {
    /// Returns an error if the search must be aborted.
    pub(crate) fn check_abort(&self) -> Result<(), MatchError> {
        if let Some(interrupt) = &self.interrupt {
            if interrupt.load(Ordering::Relaxed) {
                return Err(MatchError::Interrupted);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MatchError::Timeout);
            }
        }
        Ok(())
    }
}

/// Texts captured by `\z(...\)` in a match, that can be referenced with
/// `\z1`..`\z9` by a later search with a different pattern.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExternalTexts([Option<Vec<u8>>; NSUBEXP]);

impl ExternalTexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the text for `\z<n>`. Numbers outside `1..=9` are ignored.
    pub fn with<T: Into<Vec<u8>>>(mut self, n: usize, text: T) -> Self {
        if (1..NSUBEXP).contains(&n) {
            self.0[n] = Some(text.into());
        }
        self
    }

    /// Returns the text for `\z<n>`.
    pub fn get(&self, n: usize) -> Option<&[u8]> {
        self.0.get(n)?.as_deref()
    }

    pub(crate) fn set(&mut self, n: usize, text: &[u8]) {
        self.0[n] = Some(text.to_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|t| t.is_none())
    }
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub(crate) span: Span,
    pub(crate) groups: [Option<Span>; NSUBEXP],
    pub(crate) external: [Option<Span>; NSUBEXP],
    pub(crate) external_texts: ExternalTexts,
}

impl MatchResult {
    /// The whole match.
    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    /// Returns capture group `n`, where group 0 is the whole match. Groups
    /// that didn't participate in the match are `None`.
    pub fn group(&self, n: usize) -> Option<Span> {
        if n == 0 {
            Some(self.span)
        } else {
            self.groups.get(n).copied().flatten()
        }
    }

    /// Returns an iterator over groups 0 to 9.
    pub fn groups(&self) -> impl Iterator<Item = Option<Span>> + '_ {
        (0..NSUBEXP).map(|n| self.group(n))
    }

    /// Returns external capture group `n` (1 to 9).
    pub fn external(&self, n: usize) -> Option<Span> {
        self.external.get(n).copied().flatten()
    }

    /// Texts of the external capture groups that start and end in the same
    /// line, for use by a later search.
    pub fn external_texts(&self) -> &ExternalTexts {
        &self.external_texts
    }
}

/// Searches for matches of an [`Engine`], usually a [`Program`].
pub struct Searcher<'r, E: Engine + ?Sized = Program> {
    engine: &'r E,
    cfg: MatchConfig,
    ctx: Context,
    timeout: Option<Duration>,
}

impl<'r, E: Engine + ?Sized> Searcher<'r, E> {
    pub fn new(engine: &'r E) -> Self {
        Self {
            engine,
            cfg: MatchConfig::default(),
            ctx: Context::default(),
            timeout: None,
        }
    }

    /// Ignore case while matching. A `\c` or `\C` in the pattern takes
    /// precedence.
    pub fn ignore_case(&mut self, yes: bool) -> &mut Self {
        self.cfg.ignore_case = yes;
        self
    }

    /// Sets a timeout for each call to [`Searcher::find`]. When the timeout
    /// expires the search fails with [`MatchError::Timeout`].
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a flag that aborts the search with [`MatchError::Interrupted`]
    /// when set by another thread.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) -> &mut Self {
        self.cfg.interrupt = Some(flag);
        self
    }

    /// Limits the memory used for backtracking, in bytes. Patterns that
    /// need more fail with [`MatchError::TooExpensive`].
    pub fn set_max_mem(&mut self, bytes: usize) -> &mut Self {
        self.cfg.max_mem = bytes;
        self
    }

    /// Texts matched by `\z1`..`\z9`, usually obtained from
    /// [`MatchResult::external_texts`].
    pub fn set_external_texts(&mut self, texts: ExternalTexts) -> &mut Self {
        self.cfg.external = texts;
        self
    }

    /// Values for cursor, mark, visual area and line number assertions.
    pub fn set_context(&mut self, ctx: Context) -> &mut Self {
        self.ctx = ctx;
        self
    }

    /// Sets the classifier that defines character classes like `\k`.
    pub fn set_classifier(
        &mut self,
        classifier: Arc<dyn CharClassifier>,
    ) -> &mut Self {
        self.cfg.classifier = classifier;
        self
    }

    /// Disables the optimizations that skip positions where a match can't
    /// start. Results are the same either way, this is useful in tests.
    pub fn disable_optimizations(&mut self, yes: bool) -> &mut Self {
        self.cfg.use_hints = !yes;
        self
    }

    /// Finds the first match at or after `start`.
    pub fn find(
        &self,
        src: &dyn TextSource,
        start: Position,
    ) -> Result<Option<MatchResult>, MatchError> {
        let mut cfg = self.cfg.clone();
        cfg.deadline = self.timeout.map(|t| Instant::now() + t);

        let result = self.engine.exec(src, start, &cfg, &self.ctx);

        if let Err(err) = &result {
            info!("search aborted at {:?}: {}", start, err);
        }

        result
    }

    /// Finds all the non-overlapping matches at or after `start`. After an
    /// empty match the search continues one character later.
    pub fn find_all(
        &self,
        src: &dyn TextSource,
        start: Position,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let mut matches = Vec::new();
        let mut pos = start;

        while let Some(m) = self.find(src, pos)? {
            let span = m.span();
            let next = if span.is_empty() || span.end <= pos {
                src.advance(span.end.max(pos))
            } else {
                span.end
            };
            matches.push(m);
            if next <= pos || next.line >= src.line_count() {
                break;
            }
            pos = next;
        }

        Ok(matches)
    }
}

/// Tries a match at every candidate position at or after `start`, calling
/// `try_at` for each of them, and returns the first match found.
pub(crate) fn drive<F>(
    hints: &Hints,
    ignore_case: bool,
    src: &dyn TextSource,
    start: Position,
    cfg: &MatchConfig,
    mut try_at: F,
) -> Result<Option<MatchResult>, MatchError>
where
    F: FnMut(Position) -> Result<Option<MatchResult>, MatchError>,
{
    let oracle = cfg.classifier.as_ref();
    let mut candidates: usize = 0;

    for lnum in start.line..src.line_count() {
        let line = src.line(lnum);
        let mut col = if lnum == start.line { start.col } else { 0 };

        if col > line.len() {
            continue;
        }

        if cfg.use_hints {
            if let Some(literal) = hints.must_literal.as_deref() {
                if !contains(&line[col..], literal, ignore_case, oracle) {
                    continue;
                }
            }
        }

        if cfg.use_hints && hints.anchored {
            let starts_ok = match (hints.start_char, decode_char(line, col)) {
                (None, _) => true,
                (Some(s), Some((c, _))) => {
                    s == c || (ignore_case && oracle.fold(s) == oracle.fold(c))
                }
                (Some(_), None) => false,
            };
            if starts_ok {
                if let Some(m) = try_at(Position::new(lnum, col))? {
                    return Ok(Some(m));
                }
            }
            continue;
        }

        loop {
            if cfg.use_hints {
                if let Some(s) = hints.start_char {
                    match find_char(line, col, s, ignore_case, oracle) {
                        Some(found) => col = found,
                        None => break,
                    }
                }
            }

            if let Some(m) = try_at(Position::new(lnum, col))? {
                return Ok(Some(m));
            }

            match cell_len(line, col, oracle) {
                Some(len) => col += len,
                None => break,
            }

            candidates += 1;
            if candidates % 20 == 0 {
                cfg.check_abort()?;
            }
        }
    }

    Ok(None)
}

/// Returns the position of the first occurrence of `c` in `line`, starting
/// at byte `from`.
fn find_char(
    line: &[u8],
    from: usize,
    c: char,
    ignore_case: bool,
    oracle: &dyn CharClassifier,
) -> Option<usize> {
    if !ignore_case {
        let mut buf = [0; 4];
        let needle = c.encode_utf8(&mut buf);
        return line[from..].find(needle.as_bytes()).map(|i| from + i);
    }
    let folded = oracle.fold(c);
    let mut col = from;
    while let Some((t, len)) = decode_char(line, col) {
        if t == c || oracle.fold(t) == folded {
            return Some(col);
        }
        col += len;
    }
    None
}

/// Returns true if `haystack` contains `literal`.
fn contains(
    haystack: &[u8],
    literal: &[u8],
    ignore_case: bool,
    oracle: &dyn CharClassifier,
) -> bool {
    if !ignore_case {
        return memchr::memmem::find(haystack, literal).is_some();
    }
    let mut col = 0;
    loop {
        if starts_with_ic(&haystack[col..], literal, oracle) {
            return true;
        }
        match decode_char(haystack, col) {
            Some((_, len)) => col += len,
            None => return false,
        }
    }
}

/// Returns true if `text` starts with `literal`, ignoring case.
fn starts_with_ic(
    text: &[u8],
    literal: &[u8],
    oracle: &dyn CharClassifier,
) -> bool {
    let mut t = 0;
    let mut l = 0;
    while let Some((lc, llen)) = decode_char(literal, l) {
        match decode_char(text, t) {
            Some((tc, tlen)) if tc == lc || oracle.fold(tc) == oracle.fold(lc) => {
                t += tlen;
                l += llen;
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{contains, find_char, ExternalTexts};
    use crate::classes::DefaultClassifier;

    #[test]
    fn candidates() {
        let oracle = DefaultClassifier::new();

        assert_eq!(find_char(b"abcabc", 1, 'a', false, &oracle), Some(3));
        assert_eq!(find_char(b"abcAbc", 1, 'a', false, &oracle), None);
        assert_eq!(find_char(b"abcAbc", 1, 'a', true, &oracle), Some(3));
        assert_eq!(find_char("añb".as_bytes(), 0, 'ñ', false, &oracle), Some(1));
        assert_eq!(find_char("aÑb".as_bytes(), 0, 'ñ', true, &oracle), Some(1));

        assert!(contains(b"foo bar", b"bar", false, &oracle));
        assert!(!contains(b"foo BAR", b"bar", false, &oracle));
        assert!(contains(b"foo BAR", b"bar", true, &oracle));
        assert!(!contains(b"foo BA", b"bar", true, &oracle));
    }

    #[test]
    fn external_texts() {
        let texts = ExternalTexts::new().with(1, "foo").with(10, "bar");
        assert_eq!(texts.get(1), Some(b"foo".as_slice()));
        assert_eq!(texts.get(2), None);
        assert_eq!(texts.get(10), None);
        assert!(!texts.is_empty());
        assert!(ExternalTexts::new().is_empty());
    }
}
