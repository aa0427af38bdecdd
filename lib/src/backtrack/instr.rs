/*!
This module defines the nodes executed by the backtracking VM, along with
the functions that decode them.

Node encoding format
--------------------

A program is a sequence of nodes. Every node starts with a 3-bytes header:
the opcode, followed by a 16-bits little-endian offset that points to the
next node. The offset is relative to the start of the node, and is always
forward except in [`Instr::BACK`] nodes, where it's backward. An offset of 0
means that there's no next node.

```text
  +--------+--------+--------+-------------------------+
  | opcode |   next (LE)     | fixed operand (optional) |
  +--------+--------+--------+-------------------------+
```

Some nodes have a fixed-size operand right after the header (a group
number, repetition bounds, etc). Nodes like [`Instr::STAR`], [`Instr::MATCH`]
or [`Instr::BRANCH`] are followed by the nodes they apply to, which is
called the node's operand. Nodes with an operand are considered "wrappers":
the operand starts right after the header and the fixed operand, and it's
a chain of nodes linked by their "next" offsets.

For instance, `\(a\|bc\)d` is encoded as:

```text
  MOPEN 1 -> BRANCH -> BRANCH -> MCLOSE 1 -> EXACTLY "d" -> END
               |         |
          EXACTLY "a"  EXACTLY "bc"
               |         |
               +---------+--------> MCLOSE 1
```
 */

use std::fmt::{Display, Formatter};
use std::mem::size_of;

use bitvec::order::Lsb0;
use bitvec::view::BitView;
use itertools::Itertools;

use crate::classes::CharClassifier;

/// Size of the node header: opcode plus the offset to the next node.
pub const HEADER_SIZE: usize = 3;

/// Maximum number of capture groups, including the whole-match group 0.
pub const NSUBEXP: usize = 10;

/// Maximum number of `\{}` applied to groups in a single pattern.
pub const MAX_COMPLEX_BRACES: usize = 10;

/// Upper bound used for unbounded repetitions.
pub const MAX_LIMIT: u32 = 32767 << 16;

/// Decoded node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Instr<'a> {
    /// End of the program or of an operand.
    End,
    /// Start of line.
    Bol,
    /// End of line.
    Eol,
    /// Start of one alternative. The operand is the alternative, the next
    /// node is the next BRANCH (if any).
    Branch,
    /// Loop edge, next points backwards.
    Back,
    /// A literal string, in UTF-8.
    Exactly(&'a [u8]),
    /// Matches the empty string.
    Nothing,
    /// The operand repeated zero or more times.
    Star,
    /// The operand repeated one or more times.
    Plus,
    /// Positive lookahead.
    Match,
    /// Negative lookahead.
    NoMatch,
    /// Atomic group.
    SubPat,
    /// Lookbehind, looking back at most `limit` bytes (0 is no limit).
    Behind { limit: u32, negative: bool },
    /// The operand repeated a number of times given by the previous
    /// BRACE_LIMITS node.
    BraceSimple,
    /// Start of word.
    Bow,
    /// End of word.
    Eow,
    /// Repetition bounds for the BRACE_SIMPLE or BRACE_COMPLEX that follows.
    /// When `min > max` the repetition is lazy.
    BraceLimits { min: u32, max: u32 },
    /// Line break.
    Newl,
    /// End of lookbehind operand.
    BhPos,
    /// Any character. With `nl` also a line break.
    Any { nl: bool },
    /// A character in one of the predefined classes (`\s`, `\d`, ...).
    Class { class: CharClass, nl: bool },
    /// A character in an explicit set (`[...]`).
    AnyOf(CharSet<'a>),
    /// Start of capture group (0 is `\zs`).
    MOpen(u8),
    /// End of capture group (0 is `\ze`).
    MClose(u8),
    /// Backreference to a capture group.
    BackRef(u8),
    /// Start of external capture group.
    ZOpen(u8),
    /// End of external capture group.
    ZClose(u8),
    /// Reference to an external capture from a previous match.
    ZRef(u8),
    /// Start of a non-capturing group.
    NOpen,
    /// End of a non-capturing group.
    NClose,
    /// Repetition of a group, using the counter in the given slot.
    BraceComplex(u8),
    /// Start of text.
    Bof,
    /// End of text.
    Eof,
    /// Cursor position.
    Cursor,
    /// Line number comparison.
    LNum(NumCmp),
    /// Byte column comparison.
    Col(NumCmp),
    /// Virtual column comparison.
    VCol(NumCmp),
    /// Position of a mark.
    Mark { mark: char, cmp: Cmp },
    /// Inside visual area.
    Visual,
    /// Skip composing characters.
    Composing,
}

impl<'a> Instr<'a> {
    pub const END: u8 = 0x00;
    pub const BOL: u8 = 0x01;
    pub const EOL: u8 = 0x02;
    pub const BRANCH: u8 = 0x03;
    pub const BACK: u8 = 0x04;
    pub const EXACTLY: u8 = 0x05;
    pub const NOTHING: u8 = 0x06;
    pub const STAR: u8 = 0x07;
    pub const PLUS: u8 = 0x08;
    pub const MATCH: u8 = 0x09;
    pub const NOMATCH: u8 = 0x0A;
    pub const BEHIND: u8 = 0x0B;
    pub const NOBEHIND: u8 = 0x0C;
    pub const SUBPAT: u8 = 0x0D;
    pub const BRACE_SIMPLE: u8 = 0x0E;
    pub const BOW: u8 = 0x0F;
    pub const EOW: u8 = 0x10;
    pub const BRACE_LIMITS: u8 = 0x11;
    pub const NEWL: u8 = 0x12;
    pub const BHPOS: u8 = 0x13;
    pub const ANY: u8 = 0x14;
    pub const ANY_NL: u8 = 0x15;
    pub const CLASS: u8 = 0x16;
    pub const CLASS_NL: u8 = 0x17;
    pub const ANYOF: u8 = 0x18;
    pub const ANYOF_NL: u8 = 0x19;
    pub const ANYBUT: u8 = 0x1A;
    pub const ANYBUT_NL: u8 = 0x1B;
    pub const MOPEN: u8 = 0x1C;
    pub const MCLOSE: u8 = 0x1D;
    pub const BACKREF: u8 = 0x1E;
    pub const ZOPEN: u8 = 0x1F;
    pub const ZCLOSE: u8 = 0x20;
    pub const ZREF: u8 = 0x21;
    pub const NOPEN: u8 = 0x22;
    pub const NCLOSE: u8 = 0x23;
    pub const BRACE_COMPLEX: u8 = 0x24;
    pub const RE_BOF: u8 = 0x25;
    pub const RE_EOF: u8 = 0x26;
    pub const CURSOR: u8 = 0x27;
    pub const RE_LNUM: u8 = 0x28;
    pub const RE_COL: u8 = 0x29;
    pub const RE_VCOL: u8 = 0x2A;
    pub const RE_MARK: u8 = 0x2B;
    pub const RE_VISUAL: u8 = 0x2C;
    pub const RE_COMPOSING: u8 = 0x2D;

    /// Returns true for opcodes that also match a line break.
    #[inline]
    pub fn with_nl(op: u8) -> bool {
        matches!(
            op,
            Self::ANY_NL | Self::CLASS_NL | Self::ANYOF_NL | Self::ANYBUT_NL
        )
    }

    /// Returns true for opcodes whose operand is a chain of nodes that can
    /// be extended with [`super::compiler`]'s `regoptail`.
    #[inline]
    pub fn has_chained_operand(op: u8) -> bool {
        op == Self::BRANCH || op == Self::BRACE_COMPLEX
    }

    /// Size of the fixed operand that follows the header of nodes with
    /// the given opcode, not including variable-length data.
    pub fn fixed_operand_size(op: u8) -> usize {
        match op {
            Self::CLASS
            | Self::CLASS_NL
            | Self::MOPEN
            | Self::MCLOSE
            | Self::BACKREF
            | Self::ZOPEN
            | Self::ZCLOSE
            | Self::ZREF
            | Self::BRACE_COMPLEX => size_of::<u8>(),
            Self::BRACE_LIMITS => 2 * size_of::<u32>(),
            Self::BEHIND | Self::NOBEHIND => size_of::<u32>(),
            Self::RE_LNUM | Self::RE_COL | Self::RE_VCOL => {
                size_of::<u32>() + 2
            }
            Self::RE_MARK => size_of::<u32>() + 1,
            _ => 0,
        }
    }
}

/// Comparison performed by line, column and mark assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Equal,
    Less,
    Greater,
}

impl Cmp {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Cmp::Equal => b'=',
            Cmp::Less => b'<',
            Cmp::Greater => b'>',
        }
    }

    pub(crate) fn from_u8(b: u8) -> Self {
        match b {
            b'<' => Cmp::Less,
            b'>' => Cmp::Greater,
            _ => Cmp::Equal,
        }
    }

    /// Compares `value` against `n`.
    #[inline]
    pub fn eval(self, value: usize, n: usize) -> bool {
        match self {
            Cmp::Equal => value == n,
            Cmp::Less => value < n,
            Cmp::Greater => value > n,
        }
    }
}

/// Operand of line and column assertions. When `relative` is true the
/// number is taken from the cursor position at match time, and `n` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NumCmp {
    pub n: u32,
    pub cmp: Cmp,
    pub relative: bool,
}

/// Predefined character classes, in the order of their letters in
/// `iIkKfFpPsSdDxXoOwWhHaAlLuU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharClass {
    Ident,
    SIdent,
    Keyword,
    SKeyword,
    Fname,
    SFname,
    Print,
    SPrint,
    White,
    NWhite,
    Digit,
    NDigit,
    Hex,
    NHex,
    Octal,
    NOctal,
    Word,
    NWord,
    Head,
    NHead,
    Alpha,
    NAlpha,
    Lower,
    NLower,
    Upper,
    NUpper,
}

impl CharClass {
    const LETTERS: &'static [u8; 26] = b"iIkKfFpPsSdDxXoOwWhHaAlLuU";

    const ALL: [CharClass; 26] = [
        CharClass::Ident,
        CharClass::SIdent,
        CharClass::Keyword,
        CharClass::SKeyword,
        CharClass::Fname,
        CharClass::SFname,
        CharClass::Print,
        CharClass::SPrint,
        CharClass::White,
        CharClass::NWhite,
        CharClass::Digit,
        CharClass::NDigit,
        CharClass::Hex,
        CharClass::NHex,
        CharClass::Octal,
        CharClass::NOctal,
        CharClass::Word,
        CharClass::NWord,
        CharClass::Head,
        CharClass::NHead,
        CharClass::Alpha,
        CharClass::NAlpha,
        CharClass::Lower,
        CharClass::NLower,
        CharClass::Upper,
        CharClass::NUpper,
    ];

    /// Returns the class for a letter like `s` in `\s`.
    pub fn from_letter(c: char) -> Option<Self> {
        let c = u8::try_from(c as u32).ok()?;
        Self::LETTERS.iter().position(|l| *l == c).map(|i| Self::ALL[i])
    }

    pub(crate) fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }

    pub fn letter(self) -> char {
        Self::LETTERS[self as usize] as char
    }

    /// Returns true if the character `c` belongs to the class. `None`
    /// stands for the end of the line, which doesn't belong to any class.
    pub fn matches(self, c: Option<char>, oracle: &dyn CharClassifier) -> bool {
        let c = match c {
            Some(c) => c,
            None => return false,
        };
        match self {
            CharClass::Ident => oracle.is_ident(c),
            CharClass::SIdent => !oracle.is_digit(c) && oracle.is_ident(c),
            CharClass::Keyword => oracle.is_keyword(c),
            CharClass::SKeyword => !oracle.is_digit(c) && oracle.is_keyword(c),
            CharClass::Fname => oracle.is_fname(c),
            CharClass::SFname => !oracle.is_digit(c) && oracle.is_fname(c),
            CharClass::Print => oracle.is_print(c),
            CharClass::SPrint => !oracle.is_digit(c) && oracle.is_print(c),
            CharClass::White => oracle.is_space(c),
            CharClass::NWhite => !oracle.is_space(c),
            CharClass::Digit => oracle.is_digit(c),
            CharClass::NDigit => !oracle.is_digit(c),
            CharClass::Hex => oracle.is_hex(c),
            CharClass::NHex => !oracle.is_hex(c),
            CharClass::Octal => oracle.is_octal(c),
            CharClass::NOctal => !oracle.is_octal(c),
            CharClass::Word => oracle.is_word(c),
            CharClass::NWord => !oracle.is_word(c),
            CharClass::Head => oracle.is_head(c),
            CharClass::NHead => !oracle.is_head(c),
            CharClass::Alpha => oracle.is_alpha(c),
            CharClass::NAlpha => !oracle.is_alpha(c),
            CharClass::Lower => oracle.is_lower(c),
            CharClass::NLower => !oracle.is_lower(c),
            CharClass::Upper => oracle.is_upper(c),
            CharClass::NUpper => !oracle.is_upper(c),
        }
    }
}

/// Named classes that can appear inside a collection, like `[:alpha:]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PosixClass {
    Alnum,
    Alpha,
    Blank,
    Cntrl,
    Digit,
    Graph,
    Lower,
    Print,
    Punct,
    Space,
    Upper,
    XDigit,
    Tab,
    Return,
    Backspace,
    Escape,
    Ident,
    Keyword,
    Fname,
}

impl PosixClass {
    pub(crate) const NAMES: [(&'static str, PosixClass); 19] = [
        ("alnum", PosixClass::Alnum),
        ("alpha", PosixClass::Alpha),
        ("blank", PosixClass::Blank),
        ("cntrl", PosixClass::Cntrl),
        ("digit", PosixClass::Digit),
        ("graph", PosixClass::Graph),
        ("lower", PosixClass::Lower),
        ("print", PosixClass::Print),
        ("punct", PosixClass::Punct),
        ("space", PosixClass::Space),
        ("upper", PosixClass::Upper),
        ("xdigit", PosixClass::XDigit),
        ("tab", PosixClass::Tab),
        ("return", PosixClass::Return),
        ("backspace", PosixClass::Backspace),
        ("escape", PosixClass::Escape),
        ("ident", PosixClass::Ident),
        ("keyword", PosixClass::Keyword),
        ("fname", PosixClass::Fname),
    ];

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize].0
    }

    /// Returns true if `c` belongs to the class. Classes that depend on
    /// the locale are limited to the Latin-1 range.
    pub fn matches(self, c: char, oracle: &dyn CharClassifier) -> bool {
        let latin1 = (c as u32) < 0x100;
        match self {
            PosixClass::Alnum => c.is_ascii_alphanumeric(),
            PosixClass::Alpha => c.is_ascii_alphabetic(),
            PosixClass::Blank => c == ' ' || c == '\t',
            PosixClass::Cntrl => c.is_ascii_control() && c != '\0',
            PosixClass::Digit => c.is_ascii_digit(),
            PosixClass::Graph => c.is_ascii_graphic(),
            PosixClass::Lower => {
                latin1
                    && oracle.is_unicode_lower(c)
                    && c != '\u{aa}'
                    && c != '\u{ba}'
            }
            PosixClass::Print => latin1 && c != '\0' && oracle.is_print(c),
            PosixClass::Punct => c.is_ascii_punctuation(),
            PosixClass::Space => matches!(c, '\t'..='\r' | ' '),
            PosixClass::Upper => latin1 && oracle.is_unicode_upper(c),
            PosixClass::XDigit => c.is_ascii_hexdigit(),
            PosixClass::Tab => c == '\t',
            PosixClass::Return => c == '\r',
            PosixClass::Backspace => c == '\u{8}',
            PosixClass::Escape => c == '\u{1b}',
            PosixClass::Ident => latin1 && c != '\0' && oracle.is_ident(c),
            PosixClass::Keyword => latin1 && c != '\0' && oracle.is_keyword(c),
            PosixClass::Fname => latin1 && c != '\0' && oracle.is_fname(c),
        }
    }
}

/// Operand of ANYOF and ANYBUT nodes.
///
/// The encoded form is the number of ranges (`u16`), a bitmap with the
/// named classes included in the set (`u32`, one bit per [`PosixClass`])
/// and the ranges themselves, as pairs of `u32` code points, both
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CharSet<'a> {
    pub negated: bool,
    pub nl: bool,
    classes: u32,
    ranges: &'a [u8],
}

impl<'a> CharSet<'a> {
    /// Size of the data before the ranges.
    pub const PREFIX_SIZE: usize = size_of::<u16>() + size_of::<u32>();

    /// Size of each range.
    pub const RANGE_SIZE: usize = 2 * size_of::<u32>();

    /// Returns an iterator over the ranges in the set.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, u32)> + 'a {
        self.ranges.chunks_exact(Self::RANGE_SIZE).map(|chunk| {
            (read_u32(chunk, 0), read_u32(chunk, size_of::<u32>()))
        })
    }

    /// Returns an iterator over the named classes in the set.
    pub fn classes(&self) -> impl Iterator<Item = PosixClass> + '_ {
        self.classes
            .view_bits::<Lsb0>()
            .iter_ones()
            .filter_map(|i| PosixClass::NAMES.get(i).map(|(_, class)| *class))
    }

    /// Returns true if `c` is one of the characters in the set, not taking
    /// into account whether the set is negated.
    pub fn contains(&self, c: char, oracle: &dyn CharClassifier) -> bool {
        let cp = c as u32;
        if self.ranges().any(|(lo, hi)| lo <= cp && cp <= hi) {
            return true;
        }
        self.classes != 0 && self.classes().any(|class| class.matches(c, oracle))
    }

    /// Like [`CharSet::contains`], but when `ignore_case` is true the
    /// lowercase and uppercase forms of `c` are checked too.
    pub fn contains_ic(
        &self,
        c: char,
        ignore_case: bool,
        oracle: &dyn CharClassifier,
    ) -> bool {
        if self.contains(c, oracle) {
            return true;
        }
        if !ignore_case {
            return false;
        }
        let lower = oracle.to_lower(c);
        let upper = oracle.to_upper(c);
        (lower != c && self.contains(lower, oracle))
            || (upper != c && self.contains(upper, oracle))
    }

    /// Returns true if the set matches `c`, taking negation into account.
    #[inline]
    pub fn matches(
        &self,
        c: char,
        ignore_case: bool,
        oracle: &dyn CharClassifier,
    ) -> bool {
        self.contains_ic(c, ignore_case, oracle) != self.negated
    }
}

#[inline]
pub(crate) fn read_u16(code: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([code[at], code[at + 1]])
}

#[inline]
pub(crate) fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

/// Returns the opcode of the node at `addr`.
#[inline]
pub(crate) fn op(code: &[u8], addr: usize) -> u8 {
    code[addr]
}

/// Returns the address of the node that follows the one at `addr`.
#[inline]
pub(crate) fn next(code: &[u8], addr: usize) -> Option<usize> {
    let offset = read_u16(code, addr + 1) as usize;
    if offset == 0 {
        None
    } else if code[addr] == Instr::BACK {
        Some(addr - offset)
    } else {
        Some(addr + offset)
    }
}

/// Returns the address where the operand of the node at `addr` starts.
#[inline]
pub(crate) fn operand(code: &[u8], addr: usize) -> usize {
    addr + HEADER_SIZE + Instr::fixed_operand_size(code[addr])
}

/// Parses a program, returning individual nodes and their addresses.
pub(crate) struct InstrParser<'a> {
    code: &'a [u8],
    addr: usize,
}

impl<'a> InstrParser<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, addr: 0 }
    }

    /// Decodes the node at `addr`, returning the node and its total size,
    /// including variable-length data.
    ///
    /// Returns `None` if the opcode is unknown or the node is truncated,
    /// which only happens with corrupted programs.
    pub fn decode_instr(code: &[u8], addr: usize) -> Option<(Instr, usize)> {
        let node = code.get(addr..)?;
        if node.len() < HEADER_SIZE {
            return None;
        }
        let opcode = node[0];
        let fixed = HEADER_SIZE + Instr::fixed_operand_size(opcode);
        if node.len() < fixed {
            return None;
        }
        let arg = HEADER_SIZE;
        let instr = match opcode {
            Instr::END => Instr::End,
            Instr::BOL => Instr::Bol,
            Instr::EOL => Instr::Eol,
            Instr::BRANCH => Instr::Branch,
            Instr::BACK => Instr::Back,
            Instr::EXACTLY => {
                let len = read_u16(node, arg) as usize;
                let bytes = node.get(arg + 2..arg + 2 + len)?;
                return Some((Instr::Exactly(bytes), arg + 2 + len));
            }
            Instr::NOTHING => Instr::Nothing,
            Instr::STAR => Instr::Star,
            Instr::PLUS => Instr::Plus,
            Instr::MATCH => Instr::Match,
            Instr::NOMATCH => Instr::NoMatch,
            Instr::SUBPAT => Instr::SubPat,
            Instr::BEHIND | Instr::NOBEHIND => Instr::Behind {
                limit: read_u32(node, arg),
                negative: opcode == Instr::NOBEHIND,
            },
            Instr::BRACE_SIMPLE => Instr::BraceSimple,
            Instr::BOW => Instr::Bow,
            Instr::EOW => Instr::Eow,
            Instr::BRACE_LIMITS => Instr::BraceLimits {
                min: read_u32(node, arg),
                max: read_u32(node, arg + size_of::<u32>()),
            },
            Instr::NEWL => Instr::Newl,
            Instr::BHPOS => Instr::BhPos,
            Instr::ANY => Instr::Any { nl: false },
            Instr::ANY_NL => Instr::Any { nl: true },
            Instr::CLASS | Instr::CLASS_NL => Instr::Class {
                class: CharClass::from_u8(node[arg])?,
                nl: opcode == Instr::CLASS_NL,
            },
            Instr::ANYOF
            | Instr::ANYOF_NL
            | Instr::ANYBUT
            | Instr::ANYBUT_NL => {
                let prefix = node.get(arg..arg + CharSet::PREFIX_SIZE)?;
                let n = read_u16(prefix, 0) as usize;
                let start = arg + CharSet::PREFIX_SIZE;
                let end = start + n * CharSet::RANGE_SIZE;
                let set = CharSet {
                    negated: opcode == Instr::ANYBUT
                        || opcode == Instr::ANYBUT_NL,
                    nl: Instr::with_nl(opcode),
                    classes: read_u32(prefix, size_of::<u16>()),
                    ranges: node.get(start..end)?,
                };
                return Some((Instr::AnyOf(set), end));
            }
            Instr::MOPEN => Instr::MOpen(node[arg]),
            Instr::MCLOSE => Instr::MClose(node[arg]),
            Instr::BACKREF => Instr::BackRef(node[arg]),
            Instr::ZOPEN => Instr::ZOpen(node[arg]),
            Instr::ZCLOSE => Instr::ZClose(node[arg]),
            Instr::ZREF => Instr::ZRef(node[arg]),
            Instr::NOPEN => Instr::NOpen,
            Instr::NCLOSE => Instr::NClose,
            Instr::BRACE_COMPLEX => Instr::BraceComplex(node[arg]),
            Instr::RE_BOF => Instr::Bof,
            Instr::RE_EOF => Instr::Eof,
            Instr::CURSOR => Instr::Cursor,
            Instr::RE_LNUM | Instr::RE_COL | Instr::RE_VCOL => {
                let cmp = NumCmp {
                    n: read_u32(node, arg),
                    cmp: Cmp::from_u8(node[arg + size_of::<u32>()]),
                    relative: node[arg + size_of::<u32>() + 1] != 0,
                };
                match opcode {
                    Instr::RE_LNUM => Instr::LNum(cmp),
                    Instr::RE_COL => Instr::Col(cmp),
                    _ => Instr::VCol(cmp),
                }
            }
            Instr::RE_MARK => Instr::Mark {
                mark: char::from_u32(read_u32(node, arg))?,
                cmp: Cmp::from_u8(node[arg + size_of::<u32>()]),
            },
            Instr::RE_VISUAL => Instr::Visual,
            Instr::RE_COMPOSING => Instr::Composing,
            _ => return None,
        };
        Some((instr, fixed))
    }
}

impl<'a> Iterator for InstrParser<'a> {
    type Item = (Instr<'a>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (instr, size) = InstrParser::decode_instr(self.code, self.addr)?;
        let addr = self.addr;
        self.addr += size;
        Some((instr, addr))
    }
}

/// Disassembles a program, one node per line.
pub(crate) struct Disassembly<'a>(pub &'a [u8]);

impl Display for Disassembly<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;

        for (instr, addr) in InstrParser::new(self.0) {
            write!(f, "{:05x}: ", addr)?;
            match instr {
                Instr::End => write!(f, "END")?,
                Instr::Bol => write!(f, "BOL")?,
                Instr::Eol => write!(f, "EOL")?,
                Instr::Branch => write!(f, "BRANCH")?,
                Instr::Back => write!(f, "BACK")?,
                Instr::Exactly(bytes) => write!(
                    f,
                    "EXACTLY {:?}",
                    bstr::BStr::new(bytes)
                )?,
                Instr::Nothing => write!(f, "NOTHING")?,
                Instr::Star => write!(f, "STAR")?,
                Instr::Plus => write!(f, "PLUS")?,
                Instr::Match => write!(f, "MATCH")?,
                Instr::NoMatch => write!(f, "NOMATCH")?,
                Instr::SubPat => write!(f, "SUBPAT")?,
                Instr::Behind { limit, negative: false } => {
                    write!(f, "BEHIND {}", limit)?
                }
                Instr::Behind { limit, negative: true } => {
                    write!(f, "NOBEHIND {}", limit)?
                }
                Instr::BraceSimple => write!(f, "BRACE_SIMPLE")?,
                Instr::Bow => write!(f, "BOW")?,
                Instr::Eow => write!(f, "EOW")?,
                Instr::BraceLimits { min, max } => {
                    write!(f, "BRACE_LIMITS {} {}", min, max)?
                }
                Instr::Newl => write!(f, "NEWL")?,
                Instr::BhPos => write!(f, "BHPOS")?,
                Instr::Any { nl } => {
                    write!(f, "ANY{}", if nl { "+NL" } else { "" })?
                }
                Instr::Class { class, nl } => write!(
                    f,
                    "CLASS \\{}{}",
                    class.letter(),
                    if nl { " +NL" } else { "" }
                )?,
                Instr::AnyOf(set) => {
                    write!(f, "{}", if set.negated { "ANYBUT" } else { "ANYOF" })?;
                    if set.nl {
                        write!(f, "+NL")?;
                    }
                    let items = set
                        .ranges()
                        .map(|(lo, hi)| {
                            if lo == hi {
                                format!("{:#x}", lo)
                            } else {
                                format!("{:#x}-{:#x}", lo, hi)
                            }
                        })
                        .chain(
                            set.classes()
                                .map(|class| format!("[:{}:]", class.name())),
                        )
                        .join(" ");
                    if !items.is_empty() {
                        write!(f, " {}", items)?;
                    }
                }
                Instr::MOpen(n) => write!(f, "MOPEN {}", n)?,
                Instr::MClose(n) => write!(f, "MCLOSE {}", n)?,
                Instr::BackRef(n) => write!(f, "BACKREF {}", n)?,
                Instr::ZOpen(n) => write!(f, "ZOPEN {}", n)?,
                Instr::ZClose(n) => write!(f, "ZCLOSE {}", n)?,
                Instr::ZRef(n) => write!(f, "ZREF {}", n)?,
                Instr::NOpen => write!(f, "NOPEN")?,
                Instr::NClose => write!(f, "NCLOSE")?,
                Instr::BraceComplex(n) => write!(f, "BRACE_COMPLEX {}", n)?,
                Instr::Bof => write!(f, "BOF")?,
                Instr::Eof => write!(f, "EOF")?,
                Instr::Cursor => write!(f, "CURSOR")?,
                Instr::LNum(c) => write_num_cmp(f, "LNUM", c)?,
                Instr::Col(c) => write_num_cmp(f, "COL", c)?,
                Instr::VCol(c) => write_num_cmp(f, "VCOL", c)?,
                Instr::Mark { mark, cmp } => {
                    write!(f, "MARK {}'{}", cmp.to_u8() as char, mark)?
                }
                Instr::Visual => write!(f, "VISUAL")?,
                Instr::Composing => write!(f, "COMPOSING")?,
            }
            match next(self.0, addr) {
                Some(next) => writeln!(f, " -> {:05x}", next)?,
                None => writeln!(f)?,
            }
        }

        Ok(())
    }
}

fn write_num_cmp(
    f: &mut Formatter<'_>,
    name: &str,
    c: NumCmp,
) -> std::fmt::Result {
    write!(f, "{} {}", name, c.cmp.to_u8() as char)?;
    if c.relative {
        write!(f, ".")
    } else {
        write!(f, "{}", c.n)
    }
}
