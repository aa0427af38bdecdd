/*! Backtracking regular expression engine.

Patterns are compiled into a [`Program`], a compact sequence of nodes (see
the [`instr`] module for the encoding), that is executed by a backtracking
VM. The VM tries the alternatives of the pattern in order and reports the
first one that matches, which means that matches are leftmost-first, not
leftmost-longest.

The pattern language is Vim's: the meaning of characters like `(`, `+` or
`.` depends on the [`MagicLevel`], and can be switched within the pattern
itself with `\v`, `\m`, `\M` and `\V`.
*/

use std::fmt::{Display, Formatter};

use log::*;

use crate::backtrack::compiler::{
    CodeWriter, Compiler, Emitter, Hints, SizeCounter, HASLOOKBH, HASNL,
    REX_SET, RF_ICASE, RF_ICOMBINE, RF_NOICASE,
};
use crate::backtrack::instr::Disassembly;
use crate::backtrack::vm::BacktrackVM;
use crate::errors::{CompileError, MatchError};
use crate::searcher::{self, Engine, MatchConfig, MatchResult};
use crate::text::{Context, Position, TextSource};

pub(crate) mod collection;
pub(crate) mod compiler;
pub(crate) mod instr;
pub(crate) mod lexer;
pub(crate) mod vm;

#[cfg(test)]
mod tests;

pub use instr::{Cmp, MAX_LIMIT, NSUBEXP};

/// Determines which characters have a special meaning in a pattern without
/// being preceded by a backslash.
///
/// Levels are ordered from the fewest to the most special characters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MagicLevel {
    /// `\V`: only `\` is special.
    None,
    /// `\M`: `^` and `$` are special.
    Off,
    /// `\m`: `^`, `$`, `.`, `*`, `[` and `~` are special.
    #[default]
    On,
    /// `\v`: all ASCII characters except `0-9`, `a-z`, `A-Z` and `_` are
    /// special.
    All,
}

/// Options that control how a pattern is compiled.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub(crate) magic: MagicLevel,
    pub(crate) string_mode: bool,
    pub(crate) strict: bool,
    pub(crate) allow_external: bool,
    pub(crate) prev_sub: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Magic level at the start of the pattern.
    pub fn magic(mut self, magic: MagicLevel) -> Self {
        self.magic = magic;
        self
    }

    /// When true, `\n` matches a newline character within the text instead
    /// of a line break. Used for matching strings that contain newlines.
    pub fn string_mode(mut self, yes: bool) -> Self {
        self.string_mode = yes;
        self
    }

    /// In strict mode a `[` without a matching `]` and unknown escape
    /// sequences inside a collection are errors.
    pub fn strict(mut self, yes: bool) -> Self {
        self.strict = yes;
        self
    }

    /// Allows `\z(...\)` and `\z1`..`\z9`.
    pub fn allow_external(mut self, yes: bool) -> Self {
        self.allow_external = yes;
        self
    }

    /// String matched by `~`.
    pub fn prev_sub<S: Into<String>>(mut self, prev_sub: Option<S>) -> Self {
        self.prev_sub = prev_sub.map(|s| s.into());
        self
    }
}

/// A compiled pattern.
///
/// A program is immutable, and can be shared between threads and used in
/// multiple searches at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: Vec<u8>,
    flags: u8,
    regflags: u8,
    groups: usize,
    has_z: u8,
    hints: Hints,
}

impl Program {
    /// True if the pattern can match only at the start of a line.
    #[inline]
    pub fn anchored(&self) -> bool {
        self.hints.anchored
    }

    /// Character that every match starts with, when known.
    #[inline]
    pub fn start_char(&self) -> Option<char> {
        self.hints.start_char
    }

    /// String that every match must contain, when known.
    #[inline]
    pub fn must_literal(&self) -> Option<&[u8]> {
        self.hints.must_literal.as_deref()
    }

    /// Number of capture groups, not including the whole match.
    #[inline]
    pub fn capture_count(&self) -> usize {
        self.groups - 1
    }

    /// True if the pattern can match a line break.
    #[inline]
    pub fn has_newline(&self) -> bool {
        self.flags & HASNL != 0
    }

    #[inline]
    pub fn has_lookbehind(&self) -> bool {
        self.flags & HASLOOKBH != 0
    }

    /// True if the pattern defines or references external capture groups.
    #[inline]
    pub fn has_external(&self) -> bool {
        self.has_z != 0
    }

    /// Returns `Some(true)` if the pattern contains `\c`, `Some(false)` if
    /// it contains `\C`, and `None` otherwise. `\c` wins when both are
    /// present.
    pub fn case_override(&self) -> Option<bool> {
        if self.regflags & RF_ICASE != 0 {
            Some(true)
        } else if self.regflags & RF_NOICASE != 0 {
            Some(false)
        } else {
            None
        }
    }

    /// True if the pattern contains `\Z`.
    #[inline]
    pub fn ignore_combining(&self) -> bool {
        self.regflags & RF_ICOMBINE != 0
    }

    /// The program's code.
    #[inline]
    pub fn code(&self) -> &[u8] {
        self.code.as_slice()
    }

    #[inline]
    pub(crate) fn hints(&self) -> &Hints {
        &self.hints
    }

    /// True if the pattern contains `\z(`, and therefore a match produces
    /// external texts.
    #[inline]
    pub(crate) fn sets_external(&self) -> bool {
        self.has_z & REX_SET != 0
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Disassembly(self.code.as_slice()))
    }
}

impl Engine for Program {
    fn exec(
        &self,
        src: &dyn TextSource,
        start: Position,
        cfg: &MatchConfig,
        ctx: &Context,
    ) -> Result<Option<MatchResult>, MatchError> {
        let mut vm = BacktrackVM::new(self, src, cfg, ctx);
        let ignore_case = vm.ignore_case();

        // With `\Z` the text may have composing characters in the middle of
        // the required literal.
        let without_literal;
        let hints = if self.ignore_combining() && self.hints.must_literal.is_some()
        {
            without_literal = Hints { must_literal: None, ..self.hints.clone() };
            &without_literal
        } else {
            self.hints()
        };

        searcher::drive(hints, ignore_case, src, start, cfg, |pos| vm.try_at(pos))
    }
}

/// Prefix that selects the regexp engine. There's only one engine, so the
/// prefix is accepted and ignored.
const ENGINE_PREFIX: &[u8] = br"\%#=";

/// Compiles a pattern.
pub fn compile(
    pattern: &str,
    options: &CompileOptions,
) -> Result<Program, CompileError> {
    let mut skipped = 0;
    let mut pattern = pattern;

    if let Some(rest) = pattern.as_bytes().strip_prefix(ENGINE_PREFIX) {
        if matches!(rest.first(), Some(b'0'..=b'2')) {
            warn!(
                "ignoring engine selection `{}`",
                &pattern[..ENGINE_PREFIX.len() + 1]
            );
            skipped = ENGINE_PREFIX.len() + 1;
            pattern = &pattern[skipped..];
        }
    }

    let shift = |mut err: CompileError| {
        err.position = err.position.map(|p| p + skipped);
        err
    };

    // First pass, compute the size of the program.
    let mut sizer = Compiler::new(SizeCounter::default(), pattern, options);
    sizer.compile().map_err(shift)?;

    let size = sizer.e.location();
    if size > u16::MAX as usize {
        return Err(CompileError::new("pattern too long", 0));
    }

    // Second pass, emit the code.
    let mut writer =
        Compiler::new(CodeWriter::with_capacity(size), pattern, options);
    let summary = writer.compile().map_err(shift)?;

    if writer.toolong {
        return Err(CompileError::new("pattern too long", skipped));
    }

    let code = writer.e.into_inner();
    debug_assert_eq!(code.len(), size);

    let hints = compiler::hints(code.as_slice(), summary.flags);

    debug!(
        "compiled pattern {:?}: {} bytes, {} groups, hints: {:?}",
        pattern,
        code.len(),
        summary.groups - 1,
        hints
    );

    Ok(Program {
        code,
        flags: summary.flags,
        regflags: summary.regflags,
        groups: summary.groups,
        has_z: summary.has_z,
        hints,
    })
}
