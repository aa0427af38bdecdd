/*! Tokenizer for patterns.

Whether a character in a pattern is special or not depends on the current
magic level, on whether it was preceded by a backslash, and in some cases on
the characters around it (e.g: `^` is special only at the start of a
branch). The lexer resolves all of this and produces [`Token`]s, where
special characters are [`Token::Magic`] and the rest are [`Token::Char`].

The lexer can peek one token, and can return the last consumed token back
to the input, which is required by some constructs.
*/

use crate::backtrack::MagicLevel;
use crate::text::decode_char;

/// Characters that become special when preceded by a backslash (or that
/// stop being special, depending on the magic level). `^` and `$` are
/// handled separately.
const META: &[u8] =
    b"%&()*+.123456789<=>?@ACDFHIKLMOPSUVWXZ[_acdfhiklmnopsuvwxz{|~";

/// Backslash sequences that stand for a single non-printable character.
const ABBR: &[u8] = b"nrtebdoxuU";

/// Backslash sequences that have a meaning inside a collection.
pub(crate) const INRANGE: &[u8] = b"]^-n\\";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    /// A character without special meaning.
    Char(char),
    /// A special character, like `*` in `a*` or `(` in `\(`.
    Magic(char),
    /// End of the pattern.
    Eof,
}

impl Token {
    /// Returns the character represented by the token, regardless of
    /// whether it's magic or not. For [`Token::Eof`] returns `'\0'`.
    #[inline]
    pub fn no_magic(self) -> char {
        match self {
            Token::Char(c) | Token::Magic(c) => c,
            Token::Eof => '\0',
        }
    }

    #[inline]
    pub fn is_magic(self) -> bool {
        matches!(self, Token::Magic(_))
    }

    /// Turns a magic token into a plain one and vice versa.
    fn toggle_magic(self) -> Self {
        match self {
            Token::Char(c) => Token::Magic(c),
            Token::Magic(c) => Token::Char(c),
            Token::Eof => Token::Eof,
        }
    }
}

/// Quantifier kind, as returned by [`Lexer::multi_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Multi {
    None,
    /// `\=`, `\?` and `\+`.
    One,
    /// `*`, `\@` and `\{`.
    Mult,
}

pub(crate) fn multi_type(t: Token) -> Multi {
    match t {
        Token::Magic('@') | Token::Magic('{') | Token::Magic('*') => {
            Multi::Mult
        }
        Token::Magic('=') | Token::Magic('?') | Token::Magic('+') => {
            Multi::One
        }
        _ => Multi::None,
    }
}

/// Translates `\e`, `\t`, `\r` and `\b`.
pub(crate) fn backslash_trans(c: char) -> char {
    match c {
        'r' => '\r',
        't' => '\t',
        'e' => '\u{1b}',
        'b' => '\u{8}',
        c => c,
    }
}

pub(crate) struct Lexer<'a> {
    src: &'a [u8],
    /// Position within `src` of the next character to be consumed.
    pub pos: usize,
    pub magic: MagicLevel,
    curchr: Option<Token>,
    nextchr: Option<Token>,
    prevchr: Option<Token>,
    prevprevchr: Option<Token>,
    /// True at the start of the pattern and after `\(`, `\|`, etc.
    pub at_start: bool,
    pub prev_at_start: bool,
    after_slash: usize,
    prevchr_len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, magic: MagicLevel) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            magic,
            curchr: None,
            nextchr: None,
            prevchr: None,
            prevprevchr: None,
            at_start: true,
            prev_at_start: false,
            after_slash: 0,
            prevchr_len: 0,
        }
    }

    /// Returns the byte at `pos + offset`, or 0 past the end.
    #[inline]
    pub fn byte(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    /// Returns the whole pattern.
    #[inline]
    pub fn src(&self) -> &'a [u8] {
        self.src
    }

    /// Returns the unparsed part of the pattern.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.src[self.pos.min(self.src.len())..]
    }

    /// Decodes the character at `pos`, returning it with its length.
    #[inline]
    pub fn char_at_pos(&self) -> Option<(char, usize)> {
        decode_char(self.src, self.pos)
    }

    /// Forgets the peeked token, the next call to [`Lexer::peek`] will
    /// read it again from the current position.
    #[inline]
    pub fn reset_peek(&mut self) {
        self.curchr = None;
    }

    /// Returns the next token without consuming it.
    pub fn peek(&mut self) -> Token {
        if let Some(t) = self.curchr {
            return t;
        }
        let t = self.peek_at(self.pos);
        self.curchr = Some(t);
        t
    }

    fn peek_at(&mut self, pos: usize) -> Token {
        let b = match self.src.get(pos) {
            Some(b) => *b,
            None => return Token::Eof,
        };
        match b {
            b'.' | b'[' | b'~' => {
                if self.magic >= MagicLevel::On {
                    Token::Magic(b as char)
                } else {
                    Token::Char(b as char)
                }
            }
            b'(' | b')' | b'{' | b'%' | b'+' | b'=' | b'?' | b'@' | b'!'
            | b'&' | b'|' | b'<' | b'>' | b'#' | b'"' | b'\'' | b','
            | b'-' | b':' | b';' | b'`' | b'/' => {
                if self.magic == MagicLevel::All {
                    Token::Magic(b as char)
                } else {
                    Token::Char(b as char)
                }
            }
            b'*' => {
                // `*` is literal at the start of a branch, after `^` and
                // right after `\(`, `\|` and `\&`, except with very magic.
                if self.magic == MagicLevel::All
                    || (self.magic >= MagicLevel::On
                        && !self.at_start
                        && !(self.prev_at_start
                            && self.prevchr == Some(Token::Magic('^')))
                        && (self.after_slash > 0
                            || !matches!(
                                self.prevchr,
                                Some(Token::Magic('('))
                                    | Some(Token::Magic('&'))
                                    | Some(Token::Magic('|'))
                            )))
                {
                    Token::Magic('*')
                } else {
                    Token::Char('*')
                }
            }
            b'^' => {
                let after_open = matches!(self.prevchr, Some(t) if t.no_magic() == '(')
                    && self.prevprevchr == Some(Token::Magic('%'));
                if self.magic >= MagicLevel::Off
                    && (self.at_start
                        || self.magic == MagicLevel::All
                        || matches!(
                            self.prevchr,
                            Some(Token::Magic('('))
                                | Some(Token::Magic('|'))
                                | Some(Token::Magic('&'))
                                | Some(Token::Magic('n'))
                        )
                        || after_open)
                {
                    self.at_start = true;
                    self.prev_at_start = false;
                    Token::Magic('^')
                } else {
                    Token::Char('^')
                }
            }
            b'$' => {
                if self.magic >= MagicLevel::Off && self.dollar_is_magic(pos)
                {
                    Token::Magic('$')
                } else {
                    Token::Char('$')
                }
            }
            b'\\' => {
                let c = match self.src.get(pos + 1) {
                    Some(c) => *c,
                    // Trailing backslash.
                    None => return Token::Char('\\'),
                };
                if META.contains(&c) {
                    self.prev_at_start = self.at_start;
                    self.at_start = false;
                    self.after_slash += 1;
                    let t = self.peek_at(pos + 1);
                    self.after_slash -= 1;
                    t.toggle_magic()
                } else if ABBR.contains(&c) {
                    Token::Char(backslash_trans(c as char))
                } else if self.magic == MagicLevel::None
                    && (c == b'$' || c == b'^')
                {
                    Token::Magic(c as char)
                } else {
                    match decode_char(self.src, pos + 1) {
                        Some((c, _)) => Token::Char(c),
                        None => Token::Char('\\'),
                    }
                }
            }
            _ => match decode_char(self.src, pos) {
                Some((c, _)) => Token::Char(c),
                None => Token::Eof,
            },
        }
    }

    /// `$` is special only at the end of a branch, ignoring the flags like
    /// `\c` or `\v` that may follow it.
    fn dollar_is_magic(&self, pos: usize) -> bool {
        let at = |i: usize| self.src.get(i).copied().unwrap_or(0);
        let mut p = pos + 1;
        let mut is_magic_all = self.magic == MagicLevel::All;
        while at(p) == b'\\'
            && matches!(at(p + 1), b'c' | b'C' | b'm' | b'M' | b'v' | b'V' | b'Z')
        {
            match at(p + 1) {
                b'v' => is_magic_all = true,
                b'm' | b'M' | b'V' => is_magic_all = false,
                _ => {}
            }
            p += 2;
        }
        at(p) == 0
            || (at(p) == b'\\' && matches!(at(p + 1), b'|' | b'&' | b')' | b'n'))
            || (is_magic_all && matches!(at(p), b'|' | b'&' | b')'))
            || self.magic == MagicLevel::All
    }

    /// Consumes the peeked token.
    pub fn skip(&mut self) {
        // A backslash is consumed together with the character after it.
        self.prevchr_len = usize::from(self.src.get(self.pos) == Some(&b'\\'));
        if let Some((_, len)) = decode_char(self.src, self.pos + self.prevchr_len)
        {
            self.prevchr_len += len;
        }
        self.pos += self.prevchr_len;
        self.prev_at_start = self.at_start;
        self.at_start = false;
        self.prevprevchr = self.prevchr;
        self.prevchr = self.curchr;
        self.curchr = self.nextchr.take();
    }

    /// Like [`Lexer::skip`], but keeps the state that tells whether we
    /// are at the start of a branch. Used for flags like `\c`.
    pub fn skip_keepstart(&mut self) {
        let at_start = self.prev_at_start;
        let prevchr = self.prevchr;
        let prevprevchr = self.prevprevchr;
        self.skip();
        self.at_start = at_start;
        self.prevchr = prevchr;
        self.prevprevchr = prevprevchr;
    }

    /// Consumes and returns the next token.
    pub fn next(&mut self) -> Token {
        let t = self.peek();
        self.skip();
        t
    }

    /// Puts back the last token returned by [`Lexer::next`].
    pub fn unget(&mut self) {
        self.nextchr = self.curchr;
        self.curchr = self.prevchr;
        self.prevchr = self.prevprevchr;
        self.at_start = self.prev_at_start;
        self.prev_at_start = false;
        self.pos -= self.prevchr_len;
    }

    /// Advances the position by `n` bytes, dropping any peeked token.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.curchr = None;
        self.nextchr = None;
        self.pos += n;
    }

    /// Parses a decimal number at the current position, returning `None`
    /// if there are no digits.
    pub fn dec_number(&mut self) -> Option<u64> {
        self.number(10, usize::MAX)
    }

    pub fn oct_number(&mut self) -> Option<u64> {
        self.number(8, 11)
    }

    /// Parses up to `max_len` hexadecimal digits.
    pub fn hex_number(&mut self, max_len: usize) -> Option<u64> {
        self.number(16, max_len)
    }

    fn number(&mut self, radix: u32, max_len: usize) -> Option<u64> {
        let mut n: u64 = 0;
        let mut len = 0;
        while len < max_len {
            let digit = match (self.byte(0) as char).to_digit(radix) {
                Some(d) => d,
                None => break,
            };
            n = n.saturating_mul(radix as u64).saturating_add(digit as u64);
            self.pos += 1;
            len += 1;
        }
        self.curchr = None;
        if len == 0 {
            None
        } else {
            Some(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Lexer, Token};
    use crate::backtrack::MagicLevel;

    fn tokens(pattern: &str, magic: MagicLevel) -> Vec<Token> {
        let mut lexer = Lexer::new(pattern, magic);
        let mut result = Vec::new();
        loop {
            match lexer.next() {
                Token::Eof => break,
                t => result.push(t),
            }
        }
        result
    }

    #[test]
    fn magic_levels() {
        use Token::*;

        assert_eq!(
            tokens(r"a.b*\+", MagicLevel::On),
            vec![Char('a'), Magic('.'), Char('b'), Magic('*'), Magic('+')]
        );
        assert_eq!(
            tokens(r"a.b*\.", MagicLevel::Off),
            vec![Char('a'), Char('.'), Char('b'), Char('*'), Magic('.')]
        );
        assert_eq!(
            tokens(r"(a)+\(", MagicLevel::All),
            vec![Magic('('), Char('a'), Magic(')'), Magic('+'), Char('(')]
        );
        assert_eq!(
            tokens(r"^a$\$", MagicLevel::None),
            vec![Char('^'), Char('a'), Char('$'), Magic('$')]
        );
    }

    #[test]
    fn anchors_and_stars() {
        use Token::*;

        assert_eq!(
            tokens(r"*a^", MagicLevel::On),
            vec![Char('*'), Char('a'), Char('^')]
        );
        assert_eq!(
            tokens(r"^*", MagicLevel::On),
            vec![Magic('^'), Char('*')]
        );
        assert_eq!(
            tokens(r"\(^a\|^b$\)", MagicLevel::On),
            vec![
                Magic('('),
                Magic('^'),
                Char('a'),
                Magic('|'),
                Magic('^'),
                Char('b'),
                Magic('$'),
                Magic(')')
            ]
        );
        assert_eq!(
            tokens(r"a$b", MagicLevel::On),
            vec![Char('a'), Char('$'), Char('b')]
        );
        assert_eq!(
            tokens(r"a$\c", MagicLevel::On),
            vec![Char('a'), Magic('$'), Magic('c')]
        );
    }

    #[test]
    fn escapes() {
        use Token::*;

        assert_eq!(
            tokens(r"\t\e\q\", MagicLevel::On),
            vec![Char('\t'), Char('\u{1b}'), Char('q'), Char('\\')]
        );
        assert_eq!(tokens("ñ", MagicLevel::On), vec![Char('ñ')]);
    }

    #[test]
    fn unget() {
        let mut lexer = Lexer::new(r"a\(b", MagicLevel::On);
        assert_eq!(lexer.next(), Token::Char('a'));
        assert_eq!(lexer.next(), Token::Magic('('));
        lexer.unget();
        assert_eq!(lexer.pos, 1);
        assert_eq!(lexer.next(), Token::Magic('('));
        assert_eq!(lexer.next(), Token::Char('b'));
        assert_eq!(lexer.next(), Token::Eof);
    }
}
