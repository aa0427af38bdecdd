/*! Compiles a pattern into a program for the backtracking VM.

The compiler is a recursive-descent parser that emits nodes while parsing.
The pattern is parsed twice: the first pass only computes the size of the
program, the second one writes the nodes. Both passes run exactly the same
code, parameterized by an [`Emitter`]: [`SizeCounter`] during the first pass
and [`CodeWriter`] during the second one.

Some constructs are emitted by inserting nodes in front of code that was
already emitted (e.g: `STAR` in front of the atom it applies to, once the
`*` is found). Offsets in the "next" field are relative to the node, so
inserting bytes in front of a sequence of nodes doesn't break the links
within the sequence.
*/

use std::mem::size_of;

use crate::backtrack::collection::{self, Collection};
use crate::backtrack::instr::{
    self, CharClass, CharSet, Cmp, Instr, HEADER_SIZE, MAX_COMPLEX_BRACES,
    MAX_LIMIT, NSUBEXP,
};
use crate::backtrack::lexer::{multi_type, Lexer, Multi, Token};
use crate::backtrack::{CompileOptions, MagicLevel};
use crate::classes::is_composing;
use crate::errors::CompileError;

// Flags describing the properties of an emitted sub-expression.

/// Known never to match the empty string.
pub(crate) const HASWIDTH: u8 = 0x01;
/// Simple enough to be the operand of STAR, PLUS or BRACE_SIMPLE.
pub(crate) const SIMPLE: u8 = 0x02;
/// Starts with `*` or `+`.
pub(crate) const SPSTART: u8 = 0x04;
/// Contains a line break.
pub(crate) const HASNL: u8 = 0x08;
/// Contains a lookbehind.
pub(crate) const HASLOOKBH: u8 = 0x10;
const WORST: u8 = 0;

// Flags set by items that apply to the whole pattern.

/// `\c`
pub(crate) const RF_ICASE: u8 = 0x01;
/// `\C`
pub(crate) const RF_NOICASE: u8 = 0x02;
/// `\Z`
pub(crate) const RF_ICOMBINE: u8 = 0x04;

/// Usage of external capture groups.
pub(crate) const REX_SET: u8 = 0x01;
pub(crate) const REX_USE: u8 = 0x02;

/// Destination of the code produced by the compiler.
pub(crate) trait Emitter {
    /// True if the emitter only computes the size of the program. Links
    /// between nodes are not resolved in that case.
    fn sizing(&self) -> bool;

    /// Current size of the program.
    fn location(&self) -> usize;

    /// Appends bytes at the end of the program.
    fn emit(&mut self, bytes: &[u8]);

    /// Inserts bytes at the given location, shifting everything after it.
    fn insert(&mut self, at: usize, bytes: &[u8]);

    /// Overwrites bytes at the given location.
    fn patch(&mut self, at: usize, bytes: &[u8]);

    /// Opcode of the node at `addr`.
    fn op_at(&self, addr: usize) -> u8;

    /// Address of the node that follows the one at `addr`.
    fn next_of(&self, addr: usize) -> Option<usize>;
}

/// Emitter used in the first pass.
#[derive(Default)]
pub(crate) struct SizeCounter {
    size: usize,
}

impl Emitter for SizeCounter {
    #[inline]
    fn sizing(&self) -> bool {
        true
    }

    #[inline]
    fn location(&self) -> usize {
        self.size
    }

    #[inline]
    fn emit(&mut self, bytes: &[u8]) {
        self.size += bytes.len();
    }

    #[inline]
    fn insert(&mut self, _at: usize, bytes: &[u8]) {
        self.size += bytes.len();
    }

    fn patch(&mut self, _at: usize, _bytes: &[u8]) {}

    fn op_at(&self, _addr: usize) -> u8 {
        Instr::END
    }

    fn next_of(&self, _addr: usize) -> Option<usize> {
        None
    }
}

/// Emitter used in the second pass.
pub(crate) struct CodeWriter {
    code: Vec<u8>,
}

impl CodeWriter {
    pub fn with_capacity(size: usize) -> Self {
        Self { code: Vec::with_capacity(size) }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.code
    }
}

impl Emitter for CodeWriter {
    #[inline]
    fn sizing(&self) -> bool {
        false
    }

    #[inline]
    fn location(&self) -> usize {
        self.code.len()
    }

    #[inline]
    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn insert(&mut self, at: usize, bytes: &[u8]) {
        self.code.splice(at..at, bytes.iter().copied());
    }

    fn patch(&mut self, at: usize, bytes: &[u8]) {
        self.code[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn op_at(&self, addr: usize) -> u8 {
        self.code[addr]
    }

    fn next_of(&self, addr: usize) -> Option<usize> {
        instr::next(&self.code, addr)
    }
}

/// Kinds of parenthesized expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Paren {
    /// The whole pattern.
    None,
    /// `\(`
    Capture,
    /// `\%(`
    NonCapture,
    /// `\z(`
    External,
}

/// Information collected while compiling, besides the code itself.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Summary {
    /// Flags of the top-level expression.
    pub flags: u8,
    /// Flags set by `\c`, `\C` and `\Z`.
    pub regflags: u8,
    /// Number of capture groups, including group 0.
    pub groups: usize,
    /// Whether `\z(` or `\z1` were used.
    pub has_z: u8,
}

/// Returns the prefix used in error messages for items that are written
/// with a backslash in the current magic level.
#[inline]
fn bs(no_backslash: bool) -> &'static str {
    if no_backslash {
        ""
    } else {
        "\\"
    }
}

pub(crate) struct Compiler<'a, E: Emitter> {
    pub e: E,
    lex: Lexer<'a>,
    options: &'a CompileOptions,
    /// Next capture group number.
    regnpar: usize,
    /// Next external capture group number.
    regnzpar: usize,
    /// Capture groups whose closing parenthesis was already seen.
    had_endbrace: [bool; NSUBEXP],
    num_complex_braces: usize,
    /// Set while parsing the items in `\%[...]`.
    one_exactly: bool,
    /// Set when some offset doesn't fit in the "next" field.
    pub toolong: bool,
    regflags: u8,
    has_z: u8,
}

impl<'a, E: Emitter> Compiler<'a, E> {
    pub fn new(e: E, pattern: &'a str, options: &'a CompileOptions) -> Self {
        Self {
            e,
            lex: Lexer::new(pattern, options.magic),
            options,
            regnpar: 1,
            regnzpar: 1,
            had_endbrace: [false; NSUBEXP],
            num_complex_braces: 0,
            one_exactly: false,
            toolong: false,
            regflags: 0,
            has_z: 0,
        }
    }

    /// Compiles the whole pattern.
    pub fn compile(&mut self) -> Result<Summary, CompileError> {
        let mut flags = 0;
        self.reg(Paren::None, &mut flags)?;
        Ok(Summary {
            flags,
            regflags: self.regflags,
            groups: self.regnpar,
            has_z: self.has_z,
        })
    }

    fn error<T, M: Into<String>>(&self, message: M) -> Result<T, CompileError> {
        Err(CompileError::new(message, self.lex.pos))
    }

    fn magic_all(&self) -> bool {
        self.lex.magic == MagicLevel::All
    }

    // Node emission.

    /// Emits a node without operand and returns its address.
    fn regnode(&mut self, op: u8) -> usize {
        let addr = self.e.location();
        self.e.emit(&[op, 0, 0]);
        addr
    }

    fn regc(&mut self, b: u8) {
        self.e.emit(&[b]);
    }

    fn regc_u16(&mut self, v: u16) {
        self.e.emit(&v.to_le_bytes());
    }

    fn regc_u32(&mut self, v: u32) {
        self.e.emit(&v.to_le_bytes());
    }

    fn regmbc(&mut self, c: char) {
        let mut buf = [0; 4];
        self.e.emit(c.encode_utf8(&mut buf).as_bytes());
    }

    /// Emits a node with a group number.
    fn regnode_no(&mut self, op: u8, no: usize) -> usize {
        let addr = self.regnode(op);
        self.regc(no as u8);
        addr
    }

    /// Starts an EXACTLY node, the characters must be emitted with
    /// [`Compiler::regmbc`] and the node completed with
    /// [`Compiler::end_exactly`].
    fn begin_exactly(&mut self) -> usize {
        let addr = self.regnode(Instr::EXACTLY);
        self.regc_u16(0);
        addr
    }

    fn end_exactly(&mut self, addr: usize) {
        let start = addr + HEADER_SIZE + size_of::<u16>();
        let len = self.e.location() - start;
        match u16::try_from(len) {
            Ok(len) => self.e.patch(addr + HEADER_SIZE, &len.to_le_bytes()),
            Err(_) => self.toolong = true,
        }
    }

    /// Emits an EXACTLY node with a single character.
    fn exactly_char(&mut self, c: char) -> usize {
        let addr = self.begin_exactly();
        self.regmbc(c);
        self.end_exactly(addr);
        addr
    }

    /// Inserts a node in front of the node at `at`.
    fn reginsert(&mut self, op: u8, at: usize) {
        self.e.insert(at, &[op, 0, 0]);
    }

    /// Inserts a node with a 32-bits operand in front of the node at `at`.
    fn reginsert_nr(&mut self, op: u8, nr: u32, at: usize) {
        let mut node = [op, 0, 0, 0, 0, 0, 0];
        node[HEADER_SIZE..].copy_from_slice(&nr.to_le_bytes());
        self.e.insert(at, &node);
    }

    /// Inserts a BRACE_LIMITS node in front of the node at `at`, linked to
    /// the node at `at`.
    fn reginsert_limits(&mut self, min: u32, max: u32, at: usize) {
        let mut node = [0_u8; HEADER_SIZE + 2 * size_of::<u32>()];
        node[0] = Instr::BRACE_LIMITS;
        node[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&min.to_le_bytes());
        node[HEADER_SIZE + 4..].copy_from_slice(&max.to_le_bytes());
        self.e.insert(at, &node);
        let len = node.len();
        self.regtail(at, at + len);
    }

    /// Sets the "next" field of the last node in the chain that starts at
    /// `p` so that it points to `val`.
    fn regtail(&mut self, p: usize, val: usize) {
        if self.e.sizing() {
            return;
        }
        let mut scan = p;
        while let Some(next) = self.e.next_of(scan) {
            scan = next;
        }
        let offset = if self.e.op_at(scan) == Instr::BACK {
            scan.checked_sub(val)
        } else {
            val.checked_sub(scan)
        };
        match offset.and_then(|o| u16::try_from(o).ok()) {
            Some(o) => self.e.patch(scan + 1, &o.to_le_bytes()),
            None => self.toolong = true,
        }
    }

    /// Like [`Compiler::regtail`], but applied to the operand of `p`. Does
    /// nothing for nodes other than BRANCH and BRACE_COMPLEX.
    fn regoptail(&mut self, p: usize, val: usize) {
        if self.e.sizing() || !Instr::has_chained_operand(self.e.op_at(p)) {
            return;
        }
        let operand = p + HEADER_SIZE + Instr::fixed_operand_size(self.e.op_at(p));
        self.regtail(operand, val);
    }

    // Parsing.

    /// Parses a regular expression: the whole pattern or the content of a
    /// parenthesized group. The caller has already consumed the opening
    /// parenthesis.
    fn reg(&mut self, paren: Paren, flagp: &mut u8) -> Result<usize, CompileError> {
        *flagp = HASWIDTH;

        let mut parno = 0;
        let open = match paren {
            Paren::External => {
                if self.regnzpar >= NSUBEXP {
                    return self.error("too many \\z(");
                }
                parno = self.regnzpar;
                self.regnzpar += 1;
                Some(self.regnode_no(Instr::ZOPEN, parno))
            }
            Paren::Capture => {
                if self.regnpar >= NSUBEXP {
                    return self.error(format!(
                        "too many {}(",
                        bs(self.magic_all())
                    ));
                }
                parno = self.regnpar;
                self.regnpar += 1;
                Some(self.regnode_no(Instr::MOPEN, parno))
            }
            Paren::NonCapture => Some(self.regnode(Instr::NOPEN)),
            Paren::None => None,
        };

        // Pick up the branches, linking them together.
        let mut flags = 0;
        let br = self.regbranch(&mut flags)?;
        let ret = match open {
            Some(open) => {
                self.regtail(open, br);
                open
            }
            None => br,
        };
        if flags & HASWIDTH == 0 {
            *flagp &= !HASWIDTH;
        }
        *flagp |= flags & (SPSTART | HASNL | HASLOOKBH);

        while self.lex.peek() == Token::Magic('|') {
            self.lex.skip();
            let br = self.regbranch(&mut flags)?;
            if self.toolong {
                return self.error("pattern too long");
            }
            self.regtail(ret, br);
            if flags & HASWIDTH == 0 {
                *flagp &= !HASWIDTH;
            }
            *flagp |= flags & (SPSTART | HASNL | HASLOOKBH);
        }

        // Make a closing node, and hook it on the end.
        let ender = match paren {
            Paren::External => self.regnode_no(Instr::ZCLOSE, parno),
            Paren::Capture => self.regnode_no(Instr::MCLOSE, parno),
            Paren::NonCapture => self.regnode(Instr::NCLOSE),
            Paren::None => self.regnode(Instr::END),
        };
        self.regtail(ret, ender);

        // Hook the tails of the branches to the closing node.
        let mut br = Some(ret);
        while let Some(b) = br {
            self.regoptail(b, ender);
            br = self.e.next_of(b);
        }

        // Check for proper termination.
        if paren != Paren::None {
            if self.lex.next() != Token::Magic(')') {
                return match paren {
                    Paren::External => self.error("unmatched \\z("),
                    Paren::NonCapture => self.error(format!(
                        "unmatched {}%(",
                        bs(self.magic_all())
                    )),
                    _ => self.error(format!(
                        "unmatched {}(",
                        bs(self.magic_all())
                    )),
                };
            }
        } else if self.lex.peek() != Token::Eof {
            return if self.lex.peek() == Token::Magic(')') {
                self.error(format!("unmatched {})", bs(self.magic_all())))
            } else {
                self.error("trailing characters")
            };
        }

        if paren == Paren::Capture {
            self.had_endbrace[parno] = true;
        }

        Ok(ret)
    }

    /// Parses one alternative of an expression, which is one or more
    /// concatenations separated by `\&`.
    fn regbranch(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        *flagp = WORST | HASNL;

        let ret = self.regnode(Instr::BRANCH);
        let mut chain = None;

        loop {
            let mut flags = 0;
            let latest = self.regconcat(&mut flags)?;
            *flagp |= flags & (HASWIDTH | SPSTART | HASLOOKBH);
            // The branch contains a line break only if every concatenation
            // does.
            *flagp &= !HASNL | (flags & HASNL);
            if let Some(chain) = chain {
                self.regtail(chain, latest);
            }
            if self.lex.peek() != Token::Magic('&') {
                break;
            }
            self.lex.skip();
            let end = self.regnode(Instr::END);
            self.regtail(latest, end);
            if self.toolong {
                return self.error("pattern too long");
            }
            self.reginsert(Instr::MATCH, latest);
            chain = Some(latest);
        }

        Ok(ret)
    }

    /// Parses a sequence of pieces.
    fn regconcat(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        *flagp = WORST;

        let mut first = None;
        let mut chain: Option<usize> = None;

        loop {
            match self.lex.peek() {
                Token::Eof
                | Token::Magic('|')
                | Token::Magic('&')
                | Token::Magic(')') => break,
                Token::Magic('Z') => {
                    self.regflags |= RF_ICOMBINE;
                    self.lex.skip_keepstart();
                }
                Token::Magic('c') => {
                    self.regflags |= RF_ICASE;
                    self.lex.skip_keepstart();
                }
                Token::Magic('C') => {
                    self.regflags |= RF_NOICASE;
                    self.lex.skip_keepstart();
                }
                Token::Magic(c @ ('v' | 'm' | 'M' | 'V')) => {
                    self.lex.magic = match c {
                        'v' => MagicLevel::All,
                        'm' => MagicLevel::On,
                        'M' => MagicLevel::Off,
                        _ => MagicLevel::None,
                    };
                    self.lex.skip_keepstart();
                    self.lex.reset_peek();
                }
                _ => {
                    let mut flags = 0;
                    let latest = self.regpiece(&mut flags)?;
                    if self.toolong {
                        return self.error("pattern too long");
                    }
                    *flagp |= flags & (HASWIDTH | HASNL | HASLOOKBH);
                    match chain {
                        None => *flagp |= flags & SPSTART,
                        Some(chain) => self.regtail(chain, latest),
                    }
                    chain = Some(latest);
                    if first.is_none() {
                        first = Some(latest);
                    }
                }
            }
        }

        Ok(match first {
            Some(first) => first,
            None => self.regnode(Instr::NOTHING),
        })
    }

    /// Parses an atom, possibly followed by a quantifier.
    fn regpiece(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        let mut flags = 0;
        let ret = self.regatom(&mut flags)?;

        let op = self.lex.peek();
        if multi_type(op) == Multi::None {
            *flagp = flags;
            return Ok(ret);
        }

        *flagp = WORST | SPSTART | (flags & (HASNL | HASLOOKBH));

        self.lex.skip();
        match op {
            Token::Magic('*') => {
                if flags & SIMPLE != 0 {
                    self.reginsert(Instr::STAR, ret);
                } else {
                    // x* is emitted as (x&|), where & means "self".
                    self.reginsert(Instr::BRANCH, ret);
                    let back = self.regnode(Instr::BACK);
                    self.regoptail(ret, back);
                    self.regoptail(ret, ret);
                    let br = self.regnode(Instr::BRANCH);
                    self.regtail(ret, br);
                    let nothing = self.regnode(Instr::NOTHING);
                    self.regtail(ret, nothing);
                }
            }
            Token::Magic('+') => {
                if flags & SIMPLE != 0 {
                    self.reginsert(Instr::PLUS, ret);
                } else {
                    // x+ is emitted as x(&|), where & means "self".
                    let next = self.regnode(Instr::BRANCH);
                    self.regtail(ret, next);
                    let back = self.regnode(Instr::BACK);
                    self.regtail(back, ret);
                    let br = self.regnode(Instr::BRANCH);
                    self.regtail(next, br);
                    let nothing = self.regnode(Instr::NOTHING);
                    self.regtail(ret, nothing);
                }
                *flagp = WORST | HASWIDTH | (flags & (HASNL | HASLOOKBH));
            }
            Token::Magic('@') => {
                let nr = self.lex.dec_number();
                let lop = match self.lex.next().no_magic() {
                    '=' => Some(Instr::MATCH),
                    '!' => Some(Instr::NOMATCH),
                    '>' => Some(Instr::SUBPAT),
                    '<' => match self.lex.next().no_magic() {
                        '=' => Some(Instr::BEHIND),
                        '!' => Some(Instr::NOBEHIND),
                        _ => None,
                    },
                    _ => None,
                };
                let lop = match lop {
                    Some(lop) => lop,
                    None => {
                        return self.error(format!(
                            "invalid character after {}@",
                            bs(self.magic_all())
                        ))
                    }
                };
                let behind = lop == Instr::BEHIND || lop == Instr::NOBEHIND;
                // The lookbehind must end where the lookbehind started.
                if behind {
                    let bhpos = self.regnode(Instr::BHPOS);
                    self.regtail(ret, bhpos);
                    *flagp |= HASLOOKBH;
                }
                let end = self.regnode(Instr::END);
                self.regtail(ret, end);
                if behind {
                    // No limit is the same as a zero limit.
                    let nr = nr.unwrap_or(0).min(u32::MAX as u64) as u32;
                    self.reginsert_nr(lop, nr, ret);
                } else {
                    self.reginsert(lop, ret);
                }
            }
            Token::Magic('?') | Token::Magic('=') => {
                // x= is emitted as (x|)
                self.reginsert(Instr::BRANCH, ret);
                let br = self.regnode(Instr::BRANCH);
                self.regtail(ret, br);
                let next = self.regnode(Instr::NOTHING);
                self.regtail(ret, next);
                self.regoptail(ret, next);
            }
            Token::Magic('{') => {
                let (min, max) = self.read_limits()?;
                if flags & SIMPLE != 0 {
                    self.reginsert(Instr::BRACE_SIMPLE, ret);
                    self.reginsert_limits(min, max, ret);
                } else {
                    if self.num_complex_braces >= MAX_COMPLEX_BRACES {
                        return self.error(format!(
                            "too many complex {}{{...}}s",
                            bs(self.magic_all())
                        ));
                    }
                    self.e.insert(
                        ret,
                        &[Instr::BRACE_COMPLEX, 0, 0, self.num_complex_braces as u8],
                    );
                    let back = self.regnode(Instr::BACK);
                    self.regoptail(ret, back);
                    self.regoptail(ret, ret);
                    self.reginsert_limits(min, max, ret);
                    self.num_complex_braces += 1;
                }
                if min > 0 && max > 0 {
                    *flagp = HASWIDTH | (flags & (HASNL | HASLOOKBH));
                }
            }
            _ => unreachable!(),
        }

        // A quantifier can't follow another quantifier.
        let next = self.lex.peek();
        if multi_type(next) != Multi::None {
            return if next == Token::Magic('*') {
                self.error(format!(
                    "nested {}*",
                    bs(self.lex.magic >= MagicLevel::On)
                ))
            } else {
                self.error(format!(
                    "nested {}{}",
                    bs(self.magic_all()),
                    next.no_magic()
                ))
            };
        }

        Ok(ret)
    }

    /// Parses the inside of `\{...}`, right after the `{`. Returns the
    /// limits, with `min > max` when the repetition is lazy.
    fn read_limits(&mut self) -> Result<(u32, u32), CompileError> {
        let mut reverse = false;
        if self.lex.byte(0) == b'-' {
            // Starts with '-', so match minimal number of times.
            self.lex.advance(1);
            reverse = true;
        }
        let first_is_digit = self.lex.byte(0).is_ascii_digit();
        let clamp = |n: u64| n.min(MAX_LIMIT as u64) as u32;
        let mut min = clamp(self.lex.dec_number().unwrap_or(0));
        let mut max = if self.lex.byte(0) == b',' {
            self.lex.advance(1);
            match self.lex.dec_number() {
                Some(n) => clamp(n),
                None => MAX_LIMIT,
            }
        } else if first_is_digit {
            // It was \{n} or \{-n}
            min
        } else {
            // It was \{} or \{-}
            MAX_LIMIT
        };
        // Allow either \{...} or \{...\}
        if self.lex.byte(0) == b'\\' {
            self.lex.advance(1);
        }
        if self.lex.byte(0) != b'}' {
            return self.error(format!(
                "syntax error in {}{{...}}",
                bs(self.magic_all())
            ));
        }
        // A range with min > max is lazy. '-' always asks for the lazy
        // form, a range written backwards already is.
        if reverse && min < max {
            std::mem::swap(&mut min, &mut max);
        }
        self.lex.skip();
        Ok((min, max))
    }

    /// Makes sure that `\zs` and `\ze` are not followed by a quantifier.
    fn re_mult_next(&mut self, what: &str) -> Result<(), CompileError> {
        if multi_type(self.lex.peek()) == Multi::Mult {
            return self.error(format!("cannot repeat {}", what));
        }
        Ok(())
    }

    /// Returns an error if a back-reference to group `refnum` appears
    /// before the group is closed, which is allowed only when the
    /// back-reference is inside a lookbehind.
    fn seen_endbrace(&self, refnum: usize) -> Result<(), CompileError> {
        if !self.had_endbrace[refnum] {
            let rest = self.lex.rest();
            let in_lookbehind = rest
                .windows(3)
                .any(|w| w[0] == b'@' && w[1] == b'<' && (w[2] == b'!' || w[2] == b'='));
            if !in_lookbehind {
                return self.error("illegal back reference");
            }
        }
        Ok(())
    }

    fn error_in_optional_sequence<T>(&self) -> Result<T, CompileError> {
        self.error(format!("invalid item in {}%[]", bs(self.magic_all())))
    }

    /// Parses an atom.
    fn regatom(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        *flagp = WORST;

        let save_prev_at_start = self.lex.prev_at_start;
        let c = self.lex.next();

        let ret = match c {
            Token::Magic('^') => self.regnode(Instr::BOL),
            Token::Magic('$') => self.regnode(Instr::EOL),
            Token::Magic('<') => self.regnode(Instr::BOW),
            Token::Magic('>') => self.regnode(Instr::EOW),
            Token::Magic('_') => {
                let c = self.lex.next().no_magic();
                match c {
                    // "\_^" is start-of-line
                    '^' => self.regnode(Instr::BOL),
                    // "\_$" is end-of-line
                    '$' => self.regnode(Instr::EOL),
                    _ => {
                        *flagp |= HASNL;
                        if c == '[' {
                            match self.collection(true, flagp)? {
                                Some(ret) => ret,
                                None => self.literal(Token::Char('['), flagp),
                            }
                        } else {
                            self.class_atom(c, true, flagp)?
                        }
                    }
                }
            }
            Token::Magic(c) if c == '.' || CharClass::from_letter(c).is_some() => {
                self.class_atom(c, false, flagp)?
            }
            Token::Magic('n') => {
                if self.options.string_mode {
                    // In a string "\n" matches a newline character.
                    *flagp |= HASWIDTH | SIMPLE;
                    self.exactly_char('\n')
                } else {
                    // In buffer text "\n" matches the end of a line.
                    *flagp |= HASWIDTH | HASNL;
                    self.regnode(Instr::NEWL)
                }
            }
            Token::Magic('(') => {
                if self.one_exactly {
                    return self.error_in_optional_sequence();
                }
                let mut flags = 0;
                let ret = self.reg(Paren::Capture, &mut flags)?;
                *flagp |= flags & (HASWIDTH | SPSTART | HASNL | HASLOOKBH);
                ret
            }
            Token::Eof
            | Token::Magic('|')
            | Token::Magic('&')
            | Token::Magic(')') => {
                if self.one_exactly {
                    return self.error_in_optional_sequence();
                }
                // Should have been handled by the caller.
                return self.error("internal error");
            }
            Token::Magic(c @ ('=' | '?' | '+' | '@' | '{' | '*')) => {
                let no_backslash = if c == '*' {
                    self.lex.magic >= MagicLevel::On
                } else {
                    self.magic_all()
                };
                return self.error(format!(
                    "{}{} follows nothing",
                    bs(no_backslash),
                    c
                ));
            }
            Token::Magic('~') => {
                // Previous substitute pattern.
                let options = self.options;
                let prev_sub = match &options.prev_sub {
                    Some(prev_sub) => prev_sub,
                    None => {
                        return self.error(
                            "no previous substitute regular expression",
                        )
                    }
                };
                let ret = self.begin_exactly();
                self.e.emit(prev_sub.as_bytes());
                self.end_exactly(ret);
                if !prev_sub.is_empty() {
                    *flagp |= HASWIDTH;
                    if prev_sub.chars().count() == 1 {
                        *flagp |= SIMPLE;
                    }
                }
                ret
            }
            Token::Magic(c @ '1'..='9') => {
                let refnum = c as usize - '0' as usize;
                self.seen_endbrace(refnum)?;
                self.regnode_no(Instr::BACKREF, refnum)
            }
            Token::Magic('z') => self.regatom_z(flagp)?,
            Token::Magic('%') => self.regatom_percent(flagp, save_prev_at_start)?,
            Token::Magic('[') => match self.collection(false, flagp)? {
                Some(ret) => ret,
                None => self.literal(c, flagp),
            },
            c => self.literal(c, flagp),
        };

        Ok(ret)
    }

    /// Emits the node for `.` or for a class like `\s`.
    fn class_atom(
        &mut self,
        c: char,
        nl: bool,
        flagp: &mut u8,
    ) -> Result<usize, CompileError> {
        if c == '.' {
            // When '.' is followed by a composing char ignore the dot, so
            // that the composing char is matched here.
            if let Token::Char(next) = self.lex.peek() {
                if is_composing(next) {
                    self.lex.skip();
                    *flagp |= HASWIDTH | SIMPLE;
                    return Ok(self.exactly_char(next));
                }
            }
            *flagp |= HASWIDTH | SIMPLE;
            return Ok(self.regnode(if nl { Instr::ANY_NL } else { Instr::ANY }));
        }
        let class = match CharClass::from_letter(c) {
            Some(class) => class,
            None => return self.error("invalid use of \\_"),
        };
        let ret = self.regnode(if nl { Instr::CLASS_NL } else { Instr::CLASS });
        self.regc(class as u8);
        *flagp |= HASWIDTH | SIMPLE;
        Ok(ret)
    }

    /// Parses the item after `\z`.
    fn regatom_z(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        let c = self.lex.next().no_magic();
        match c {
            '(' => {
                if !self.options.allow_external {
                    return self.error("\\z( not allowed here");
                }
                if self.one_exactly {
                    return self.error_in_optional_sequence();
                }
                let mut flags = 0;
                let ret = self.reg(Paren::External, &mut flags)?;
                *flagp |= flags & (HASWIDTH | SPSTART | HASNL | HASLOOKBH);
                self.has_z |= REX_SET;
                Ok(ret)
            }
            '1'..='9' => {
                if !self.options.allow_external {
                    return self.error("\\z1 - \\z9 not allowed here");
                }
                self.has_z |= REX_USE;
                Ok(self.regnode_no(Instr::ZREF, c as usize - '0' as usize))
            }
            's' => {
                let ret = self.regnode_no(Instr::MOPEN, 0);
                self.re_mult_next("\\zs")?;
                Ok(ret)
            }
            'e' => {
                let ret = self.regnode_no(Instr::MCLOSE, 0);
                self.re_mult_next("\\ze")?;
                Ok(ret)
            }
            _ => self.error("invalid character after \\z"),
        }
    }

    /// Parses the item after `\%`.
    fn regatom_percent(
        &mut self,
        flagp: &mut u8,
        save_prev_at_start: bool,
    ) -> Result<usize, CompileError> {
        let c = self.lex.next().no_magic();
        let ret = match c {
            // () without a back reference
            '(' => {
                if self.one_exactly {
                    return self.error_in_optional_sequence();
                }
                let mut flags = 0;
                let ret = self.reg(Paren::NonCapture, &mut flags)?;
                *flagp |= flags & (HASWIDTH | SPSTART | HASNL | HASLOOKBH);
                ret
            }
            '^' => self.regnode(Instr::RE_BOF),
            '$' => self.regnode(Instr::RE_EOF),
            '#' => {
                if self.lex.byte(0) == b'=' && (b'0'..=b'2').contains(&self.lex.byte(1)) {
                    return self.error(format!(
                        "atom '\\%#={}' must be at the start of the pattern",
                        self.lex.byte(1) as char
                    ));
                }
                self.regnode(Instr::CURSOR)
            }
            'V' => self.regnode(Instr::RE_VISUAL),
            'C' => self.regnode(Instr::RE_COMPOSING),
            '[' => self.optional_sequence(flagp)?,
            'd' | 'o' | 'x' | 'u' | 'U' => {
                let n = match c {
                    'd' => self.lex.dec_number(),
                    'o' => self.lex.oct_number(),
                    'x' => self.lex.hex_number(2),
                    'u' => self.lex.hex_number(4),
                    _ => self.lex.hex_number(8),
                };
                let c = match n.filter(|n| *n <= i32::MAX as u64) {
                    Some(0) => '\n',
                    Some(n) => match char::from_u32(n as u32) {
                        Some(c) => c,
                        None => return self.error_invalid_code(),
                    },
                    None => return self.error_invalid_code(),
                };
                *flagp |= HASWIDTH;
                self.exactly_char(c)
            }
            c if c.is_ascii_digit() || matches!(c, '<' | '>' | '\'' | '.') => {
                self.position_atom(c, save_prev_at_start)?
            }
            _ => {
                return self.error(format!(
                    "invalid character after {}%",
                    bs(self.magic_all())
                ))
            }
        };
        Ok(ret)
    }

    fn error_invalid_code<T>(&self) -> Result<T, CompileError> {
        self.error(format!(
            "invalid character after {}%[dxouU]",
            bs(self.magic_all())
        ))
    }

    /// Parses `\%23l`, `\%<.c`, `\%>'m` and friends. `c` is the character
    /// right after `\%`.
    fn position_atom(
        &mut self,
        c: char,
        save_prev_at_start: bool,
    ) -> Result<usize, CompileError> {
        let cmp = Cmp::from_u8(c as u8);
        let mut t = Token::Char(c);
        if c == '<' || c == '>' {
            t = self.lex.next();
        }
        let mut cur = false;
        if t.no_magic() == '.' {
            cur = true;
            t = self.lex.next();
        }
        let mut n: u64 = 0;
        let mut got_digit = false;
        while let Token::Char(d @ '0'..='9') = t {
            got_digit = true;
            n = n.saturating_mul(10).saturating_add(d as u64 - '0' as u64);
            t = self.lex.next();
        }
        let n = n.min(u32::MAX as u64) as u32;

        if t.no_magic() == '\'' && n == 0 && !cur {
            // "\%'m", "\%<'m" and "\%>'m": mark
            let mark = self.lex.next().no_magic();
            let ret = self.regnode(Instr::RE_MARK);
            self.regc_u32(mark as u32);
            self.regc(cmp.to_u8());
            return Ok(ret);
        }

        let op = match t {
            Token::Char('l') => Instr::RE_LNUM,
            Token::Char('c') => Instr::RE_COL,
            Token::Char('v') => Instr::RE_VCOL,
            _ => Instr::END,
        };
        if op != Instr::END && (cur || got_digit) {
            if cur && n != 0 {
                return self.error(format!(
                    "no number allowed after .: '\\%{}'",
                    t.no_magic()
                ));
            }
            if op == Instr::RE_LNUM && save_prev_at_start {
                self.lex.at_start = true;
            }
            let ret = self.regnode(op);
            self.regc_u32(n);
            self.regc(cmp.to_u8());
            self.regc(u8::from(cur));
            return Ok(ret);
        }

        self.error(format!("invalid character after {}%", bs(self.magic_all())))
    }

    /// Parses `\%[...]`, right after the `[`. The items are emitted as a
    /// list of branches, all ending at a last branch that matches nothing.
    fn optional_sequence(&mut self, flagp: &mut u8) -> Result<usize, CompileError> {
        if self.one_exactly {
            return self.error_in_optional_sequence();
        }
        let mut ret = None;
        let mut lastnode = 0;
        loop {
            let c = self.lex.next();
            if c == Token::Char(']') {
                break;
            }
            if c == Token::Eof {
                return self.error(format!(
                    "missing ] after {}%[",
                    bs(self.magic_all())
                ));
            }
            let br = self.regnode(Instr::BRANCH);
            match ret {
                None => ret = Some(br),
                Some(_) => {
                    self.regtail(lastnode, br);
                    if self.toolong {
                        return self.error("pattern too long");
                    }
                }
            }
            self.lex.unget();
            self.one_exactly = true;
            lastnode = self.regatom(flagp)?;
            self.one_exactly = false;
        }

        let ret = match ret {
            Some(ret) => ret,
            None => {
                return self
                    .error(format!("empty {}%[]", bs(self.magic_all())))
            }
        };

        let lastbranch = self.regnode(Instr::BRANCH);
        let nothing = self.regnode(Instr::NOTHING);
        if !self.e.sizing() {
            self.regtail(lastnode, nothing);
            self.regtail(lastbranch, nothing);
            // Connect all branches to the NOTHING branch at the end.
            let mut br = ret;
            while br != lastnode {
                if self.e.op_at(br) == Instr::BRANCH {
                    self.regtail(br, lastbranch);
                    if self.toolong {
                        return self.error("pattern too long");
                    }
                    br += HEADER_SIZE;
                } else {
                    match self.e.next_of(br) {
                        Some(next) => br = next,
                        None => break,
                    }
                }
            }
        }
        *flagp &= !(HASWIDTH | SIMPLE);
        Ok(ret)
    }

    /// Parses a collection, right after the `[`. Returns `None` if there's
    /// no matching `]`, in which case the `[` is a literal.
    fn collection(
        &mut self,
        nl: bool,
        flagp: &mut u8,
    ) -> Result<Option<usize>, CompileError> {
        let src = self.lex.src();
        let start = self.lex.pos;
        let end = collection::skip_anyof(src, start);

        if src.get(end) != Some(&b']') {
            if self.options.strict {
                return self.error(format!(
                    "missing ] after {}[",
                    bs(self.lex.magic > MagicLevel::Off)
                ));
            }
            return Ok(None);
        }

        let (coll, end) =
            collection::parse(src, start, nl, self.options.strict)?;
        let ret = self.emit_collection(&coll);
        if coll.nl {
            *flagp |= HASNL;
        }

        // Consume the `]`.
        self.lex.pos = end;
        self.lex.skip();

        *flagp |= HASWIDTH | SIMPLE;
        Ok(Some(ret))
    }

    fn emit_collection(&mut self, coll: &Collection) -> usize {
        let op = match (coll.negated, coll.nl) {
            (false, false) => Instr::ANYOF,
            (false, true) => Instr::ANYOF_NL,
            (true, false) => Instr::ANYBUT,
            (true, true) => Instr::ANYBUT_NL,
        };
        let ret = self.regnode(op);
        // The number of ranges is bounded by the pattern length, which is
        // checked against the program size later.
        self.regc_u16(coll.ranges.len().min(u16::MAX as usize) as u16);
        self.regc_u32(coll.classes);
        for (lo, hi) in coll.ranges.iter().take(u16::MAX as usize) {
            self.regc_u32(*lo);
            self.regc_u32(*hi);
        }
        debug_assert_eq!(
            CharSet::PREFIX_SIZE,
            size_of::<u16>() + size_of::<u32>()
        );
        ret
    }

    /// Emits a literal string, starting with `c`. Characters are appended
    /// as long as they are not special, and are not followed by a
    /// quantifier, in which case the character must be an atom by itself.
    fn literal(&mut self, first: Token, flagp: &mut u8) -> usize {
        let ret = self.begin_exactly();
        let mut c = first;
        let mut len = 0;
        loop {
            if c == Token::Eof {
                break;
            }
            if len > 0
                && (multi_type(self.lex.peek()) != Multi::None
                    || self.one_exactly
                    || c.is_magic())
            {
                break;
            }
            self.regmbc(c.no_magic());
            // Composing characters go together with the base character.
            while let Some((cc, _)) = self.lex.char_at_pos() {
                if !is_composing(cc) {
                    break;
                }
                self.regmbc(cc);
                self.lex.next();
            }
            c = self.lex.next();
            len += 1;
        }
        self.lex.unget();
        self.end_exactly(ret);

        *flagp |= HASWIDTH;
        if len == 1 {
            *flagp |= SIMPLE;
        }
        ret
    }
}

/// Optimization hints derived from a compiled program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Hints {
    pub anchored: bool,
    pub start_char: Option<char>,
    pub must_literal: Option<Box<[u8]>>,
}

/// Computes the optimization hints for a program with the given top-level
/// flags.
pub(crate) fn hints(code: &[u8], flags: u8) -> Hints {
    let mut hints = Hints::default();
    let first_literal = |addr: usize| match instr::InstrParser::decode_instr(code, addr) {
        Some((Instr::Exactly(bytes), _)) => {
            crate::text::decode_char(bytes, 0).map(|(c, _)| c)
        }
        _ => None,
    };

    // Only when there's a single top-level alternative.
    match instr::next(code, 0) {
        Some(next) if instr::op(code, next) == Instr::END => {}
        _ => return hints,
    }

    let mut scan = instr::operand(code, 0);

    if matches!(instr::op(code, scan), Instr::BOL | Instr::RE_BOF) {
        hints.anchored = true;
        match instr::next(code, scan) {
            Some(next) => scan = next,
            None => return hints,
        }
    }

    let op = instr::op(code, scan);
    if op == Instr::EXACTLY {
        hints.start_char = first_literal(scan);
    } else if matches!(op, Instr::BOW | Instr::EOW | Instr::NOTHING | Instr::NOPEN | Instr::NCLOSE)
        || (matches!(op, Instr::MOPEN | Instr::MCLOSE) && code[scan + HEADER_SIZE] == 0)
    {
        if let Some(next) = instr::next(code, scan) {
            if instr::op(code, next) == Instr::EXACTLY {
                hints.start_char = first_literal(next);
            }
        }
    }

    // If there's something expensive in the pattern, find the longest
    // literal string that must appear. Ties are resolved in favor of later
    // strings.
    if (flags & SPSTART != 0 || matches!(op, Instr::BOW | Instr::EOW))
        && flags & HASNL == 0
    {
        let mut longest: Option<&[u8]> = None;
        let mut node = Some(scan);
        while let Some(addr) = node {
            if let Some((Instr::Exactly(bytes), _)) =
                instr::InstrParser::decode_instr(code, addr)
            {
                if bytes.len() >= longest.map_or(0, |l| l.len()) {
                    longest = Some(bytes);
                }
            }
            node = instr::next(code, addr);
        }
        hints.must_literal =
            longest.filter(|l| !l.is_empty()).map(|l| l.into());
    }

    hints
}
