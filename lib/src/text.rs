/*! Text sources and positions.

The matcher doesn't own the text it scans, it reads it line by line through
the [`TextSource`] trait. Single-line sources, like a string in memory, use
[`SingleLine`]. Multi-line sources, like the contents of an editor buffer,
implement the trait directly or use [`Lines`].

Line-number, column, mark, cursor and visual-area assertions in patterns
are evaluated against the values provided by a [`Context`].
*/

use std::ops::Range;

use bstr::ByteSlice;
use rustc_hash::FxHashMap;

use crate::classes::CharClassifier;

/// A position in a [`TextSource`].
///
/// `line` is the index of the line within the source (always 0 for
/// single-line sources), and `col` is a byte offset within that line.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }

    /// Position at byte offset `col` of a single-line source.
    pub fn at(col: usize) -> Self {
        Self { line: 0, col }
    }
}

/// The start and end of a match, or of a capture group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Returns the byte range covered by the span, only when it starts and
    /// ends in the same line.
    pub fn range(&self) -> Option<Range<usize>> {
        if self.start.line == self.end.line {
            Some(self.start.col..self.end.col)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Text consumed by the matcher, organized in lines.
///
/// Lines don't include their line terminator. A source can be either
/// single-line, in which case patterns containing `\n` can't match
/// line breaks, or multi-line.
pub trait TextSource {
    /// Number of lines in the source.
    fn line_count(&self) -> usize;

    /// Returns the content of the line with the given index.
    ///
    /// Implementations can panic if `lnum >= self.line_count()`, the
    /// matcher never asks for lines outside the source.
    fn line(&self, lnum: usize) -> &[u8];

    /// True if the source is made of multiple lines and line breaks can be
    /// matched.
    fn is_multiline(&self) -> bool {
        true
    }

    /// Returns the character at `pos`, or `None` at the end of a line.
    /// Invalid UTF-8 bytes are returned as the character with the same
    /// code point as the byte.
    fn char_at(&self, pos: Position) -> Option<char> {
        if pos.line >= self.line_count() {
            return None;
        }
        decode_char(self.line(pos.line), pos.col).map(|(c, _)| c)
    }

    /// Returns the position that follows `pos`. At the end of a line, the
    /// next position is the start of the following line.
    fn advance(&self, pos: Position) -> Position {
        if pos.line >= self.line_count() {
            return pos;
        }
        match decode_char(self.line(pos.line), pos.col) {
            Some((_, len)) => Position::new(pos.line, pos.col + len),
            None => Position::new(pos.line + 1, 0),
        }
    }
}

/// Decodes the character starting at byte `col` of `line`, returning the
/// character and its length in bytes. Returns `None` at the end of the
/// line.
pub(crate) fn decode_char(line: &[u8], col: usize) -> Option<(char, usize)> {
    let bytes = line.get(col..)?;
    if bytes.is_empty() {
        return None;
    }
    match bstr::decode_utf8(bytes) {
        (Some(c), len) => Some((c, len)),
        (None, _) => Some((char::from(bytes[0]), 1)),
    }
}

/// Decodes the character that ends right before byte `col` of `line`.
pub(crate) fn decode_last_char(
    line: &[u8],
    col: usize,
) -> Option<(char, usize)> {
    let bytes = line.get(..col)?;
    if bytes.is_empty() {
        return None;
    }
    match bstr::decode_last_utf8(bytes) {
        (Some(c), len) => Some((c, len)),
        (None, _) => Some((char::from(bytes[bytes.len() - 1]), 1)),
    }
}

/// Returns the length of the character at byte `col` of `line` together
/// with the composing characters that follow it. Returns `None` at the end
/// of the line.
pub(crate) fn cell_len(
    line: &[u8],
    col: usize,
    oracle: &dyn CharClassifier,
) -> Option<usize> {
    let (_, mut len) = decode_char(line, col)?;
    while let Some((c, n)) = decode_char(line, col + len) {
        if !oracle.is_composing(c) {
            break;
        }
        len += n;
    }
    Some(len)
}

/// Returns the start of the character that ends right before byte `col`,
/// going back over composing characters until their base character.
pub(crate) fn cell_start_before(
    line: &[u8],
    col: usize,
    oracle: &dyn CharClassifier,
) -> Option<usize> {
    let mut start = col;
    loop {
        let (c, len) = decode_last_char(line, start)?;
        start -= len;
        if start == 0 || !oracle.is_composing(c) {
            return Some(start);
        }
    }
}

/// A text source with a single line.
#[derive(Debug, Clone, Copy)]
pub struct SingleLine<'a>(&'a [u8]);

impl<'a> SingleLine<'a> {
    pub fn new<T: AsRef<[u8]> + ?Sized>(text: &'a T) -> Self {
        Self(text.as_ref())
    }
}

impl TextSource for SingleLine<'_> {
    fn line_count(&self) -> usize {
        1
    }

    fn line(&self, _lnum: usize) -> &[u8] {
        self.0
    }

    fn is_multiline(&self) -> bool {
        false
    }
}

/// A multi-line text source backed by a list of lines.
#[derive(Debug, Clone, Default)]
pub struct Lines<'a> {
    lines: Vec<&'a [u8]>,
}

impl<'a> Lines<'a> {
    pub fn new(lines: Vec<&'a [u8]>) -> Self {
        Self { lines }
    }

    /// Splits `text` at every `\n`. A `\r` right before the `\n` is removed.
    /// A trailing line terminator doesn't produce an extra empty line, but
    /// an empty text produces a single empty line.
    pub fn from_text<T: AsRef<[u8]> + ?Sized>(text: &'a T) -> Self {
        let text = text.as_ref();
        let text = text.strip_suffix(b"\n").unwrap_or(text);
        let mut lines: Vec<&[u8]> = text
            .lines_with_terminator()
            .map(|line| line.trim_end_with(|c| c == '\n' || c == '\r'))
            .collect();
        if lines.is_empty() {
            lines.push(b"");
        }
        Self { lines }
    }
}

impl TextSource for Lines<'_> {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, lnum: usize) -> &[u8] {
        self.lines[lnum]
    }
}

/// How the visual area is delimited.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum VisualMode {
    /// Characterwise, from `start` to `end`, both inclusive.
    #[default]
    Char,
    /// Linewise, whole lines from `start.line` to `end.line`.
    Line,
    /// Blockwise, the rectangle formed by the virtual columns of `start`
    /// and `end`.
    Block,
}

/// The visual area used by `\%V`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Visual {
    pub start: Position,
    pub end: Position,
    pub mode: VisualMode,
}

/// Values supplied by the embedding application for evaluating the
/// zero-width assertions `\%l`, `\%c`, `\%v`, `\%#`, `\%V` and `\%'m`.
///
/// All positions are in the coordinate system of the [`TextSource`] being
/// searched. Without a cursor, `\%#` and relative assertions like `\%.l`
/// never match. Without a visual area `\%V` never matches.
#[derive(Debug, Clone)]
pub struct Context {
    cursor: Option<Position>,
    marks: FxHashMap<char, Position>,
    visual: Option<Visual>,
    tabstop: usize,
    first_line: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            cursor: None,
            marks: FxHashMap::default(),
            visual: None,
            tabstop: 8,
            first_line: 1,
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(mut self, cursor: Position) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Sets the position of mark `name`. A column equal to `usize::MAX`
    /// stands for the end of the line.
    pub fn with_mark(mut self, name: char, pos: Position) -> Self {
        self.marks.insert(name, pos);
        self
    }

    pub fn with_visual(mut self, visual: Visual) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Width of a tab character, used for computing virtual columns.
    pub fn with_tabstop(mut self, tabstop: usize) -> Self {
        self.tabstop = tabstop.max(1);
        self
    }

    /// Line number of the source's first line as seen by `\%l`. By default
    /// it's 1, meaning that `\%1l` matches in the first line of the source.
    pub fn with_first_line(mut self, first_line: usize) -> Self {
        self.first_line = first_line;
        self
    }

    pub fn cursor(&self) -> Option<Position> {
        self.cursor
    }

    pub fn mark(&self, name: char) -> Option<Position> {
        self.marks.get(&name).copied()
    }

    pub fn visual(&self) -> Option<&Visual> {
        self.visual.as_ref()
    }

    pub fn tabstop(&self) -> usize {
        self.tabstop
    }

    pub fn first_line(&self) -> usize {
        self.first_line
    }

    /// Returns the virtual column (0-based) where the character at byte
    /// `col` of `line` starts, expanding tabs.
    pub fn virtual_col(&self, line: &[u8], col: usize) -> usize {
        let end = col.min(line.len());
        let mut vcol = 0;
        for c in line[..end].chars() {
            if c == '\t' {
                vcol += self.tabstop - vcol % self.tabstop;
            } else {
                vcol += 1;
            }
        }
        vcol
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        cell_len, cell_start_before, decode_char, decode_last_char, Context,
        Lines, Position, SingleLine, TextSource,
    };
    use crate::classes::DefaultClassifier;

    #[test]
    fn lines_from_text() {
        let lines = Lines::from_text("foo\r\nbar\n\nbaz\n");
        assert_eq!(lines.line_count(), 4);
        assert_eq!(lines.line(0), b"foo");
        assert_eq!(lines.line(1), b"bar");
        assert_eq!(lines.line(2), b"");
        assert_eq!(lines.line(3), b"baz");
        assert!(lines.is_multiline());
        assert!(!SingleLine::new("foo").is_multiline());
    }

    #[test]
    fn char_at_and_advance() {
        let lines = Lines::from_text("añb\nc");
        assert_eq!(lines.char_at(Position::new(0, 1)), Some('ñ'));
        assert_eq!(lines.advance(Position::new(0, 1)), Position::new(0, 3));
        assert_eq!(lines.char_at(Position::new(0, 4)), None);
        assert_eq!(lines.advance(Position::new(0, 4)), Position::new(1, 0));
    }

    #[test]
    fn decoding() {
        assert_eq!(decode_char(b"\xffa", 0), Some(('\u{ff}', 1)));
        assert_eq!(decode_char("€".as_bytes(), 0), Some(('€', 3)));
        assert_eq!(decode_char(b"a", 1), None);
        assert_eq!(decode_last_char("a€".as_bytes(), 4), Some(('€', 3)));
        assert_eq!(decode_last_char(b"a", 0), None);
    }

    #[test]
    fn character_cells() {
        let oracle = DefaultClassifier::new();
        let line = "ae\u{301}\u{302}b".as_bytes();
        assert_eq!(cell_len(line, 0, &oracle), Some(1));
        assert_eq!(cell_len(line, 1, &oracle), Some(5));
        assert_eq!(cell_len(line, 6, &oracle), Some(1));
        assert_eq!(cell_len(line, 7, &oracle), None);
        assert_eq!(cell_start_before(line, 6, &oracle), Some(1));
        assert_eq!(cell_start_before(line, 1, &oracle), Some(0));
        assert_eq!(cell_start_before(line, 0, &oracle), None);
    }

    #[test]
    fn virtual_columns() {
        let ctx = Context::new().with_tabstop(4);
        assert_eq!(ctx.virtual_col(b"\tab", 1), 4);
        assert_eq!(ctx.virtual_col(b"a\tb", 2), 4);
        assert_eq!(ctx.virtual_col(b"ab\tc", 4), 5);
    }
}
