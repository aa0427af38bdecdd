/*! Character classification used by the matcher.

The engine never decides by itself whether a character is part of an
identifier, a keyword or a file name. These questions are answered by a
[`CharClassifier`], which is supplied by the embedding application. The
[`DefaultClassifier`] implements the classic defaults used by Vim for the
`isident`, `iskeyword`, `isfname` and `isprint` options.
*/

use bitvec::array::BitArray;
use bitvec::order::Lsb0;

/// Answers questions about characters on behalf of the matcher.
///
/// Only the methods without a default implementation depend on the
/// embedding application's settings, the rest have sensible ASCII-based
/// defaults that match the behavior of the pattern language.
pub trait CharClassifier: Send + Sync {
    /// Returns true if `c` is an identifier character (`\i`).
    fn is_ident(&self, c: char) -> bool;

    /// Returns true if `c` is a keyword character (`\k`, `\<`, `\>`).
    fn is_keyword(&self, c: char) -> bool;

    /// Returns true if `c` is a file name character (`\f`).
    fn is_fname(&self, c: char) -> bool;

    /// Returns true if `c` is a printable character (`\p`).
    fn is_print(&self, c: char) -> bool;

    /// Space or tab (`\s`).
    fn is_space(&self, c: char) -> bool {
        c == ' ' || c == '\t'
    }

    /// ASCII digit (`\d`).
    fn is_digit(&self, c: char) -> bool {
        c.is_ascii_digit()
    }

    /// ASCII hexadecimal digit (`\x`).
    fn is_hex(&self, c: char) -> bool {
        c.is_ascii_hexdigit()
    }

    /// ASCII octal digit (`\o`).
    fn is_octal(&self, c: char) -> bool {
        ('0'..='7').contains(&c)
    }

    /// `[0-9A-Za-z_]` (`\w`).
    fn is_word(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    /// `[A-Za-z_]` (`\h`).
    fn is_head(&self, c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    /// `[A-Za-z]` (`\a`).
    fn is_alpha(&self, c: char) -> bool {
        c.is_ascii_alphabetic()
    }

    /// `[a-z]` (`\l`).
    fn is_lower(&self, c: char) -> bool {
        c.is_ascii_lowercase()
    }

    /// `[A-Z]` (`\u`).
    fn is_upper(&self, c: char) -> bool {
        c.is_ascii_uppercase()
    }

    /// Lowercase letter in any script, used by `[:lower:]`.
    fn is_unicode_lower(&self, c: char) -> bool {
        c.is_lowercase()
    }

    /// Uppercase letter in any script, used by `[:upper:]`.
    fn is_unicode_upper(&self, c: char) -> bool {
        c.is_uppercase()
    }

    /// Returns true if `c` is a composing (combining) character.
    fn is_composing(&self, c: char) -> bool {
        is_composing(c)
    }

    /// Case-folds `c` for case-insensitive comparisons.
    fn fold(&self, c: char) -> char {
        self.to_lower(c)
    }

    fn to_lower(&self, c: char) -> char {
        let mut lower = c.to_lowercase();
        match (lower.next(), lower.next()) {
            (Some(l), None) => l,
            _ => c,
        }
    }

    fn to_upper(&self, c: char) -> char {
        let mut upper = c.to_uppercase();
        match (upper.next(), upper.next()) {
            (Some(u), None) => u,
            _ => c,
        }
    }

    /// Returns the word class of `c`: 0 for blanks, 1 for punctuation and
    /// 2 or more for word characters. Two adjacent characters belong to the
    /// same word when their classes are equal. Used by `\<` and `\>`.
    fn word_class(&self, c: char) -> u8 {
        if c == ' ' || c == '\t' || c == '\0' || c == '\u{a0}' {
            return 0;
        }
        if (c as u32) < 0x100 {
            return if self.is_keyword(c) { 2 } else { 1 };
        }
        if c.is_whitespace() {
            0
        } else if c.is_alphanumeric() || self.is_keyword(c) {
            2
        } else {
            1
        }
    }
}

/// Returns true if `c` is a combining character that is drawn on top of
/// the previous one.
pub fn is_composing(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036f
        | 0x0483..=0x0489
        | 0x0591..=0x05bd
        | 0x05bf
        | 0x05c1..=0x05c2
        | 0x05c4..=0x05c5
        | 0x05c7
        | 0x0610..=0x061a
        | 0x064b..=0x065f
        | 0x0670
        | 0x06d6..=0x06dc
        | 0x06df..=0x06e4
        | 0x0e31
        | 0x0e34..=0x0e3a
        | 0x0e47..=0x0e4e
        | 0x1ab0..=0x1aff
        | 0x1dc0..=0x1dff
        | 0x20d0..=0x20ff
        | 0xfe20..=0xfe2f)
}

/// A set of characters in the Latin-1 range, described with the syntax
/// used by Vim's `isident`-like options (e.g: `@,48-57,_,192-255`).
#[derive(Debug, Clone, Default)]
pub struct Latin1Set(BitArray<[u64; 4], Lsb0>);

impl Latin1Set {
    /// Parses a comma-separated list of items, each of them is either a
    /// single character, a decimal byte value, a range `a-b` of those, or
    /// `@` which stands for all the alphabetic characters.
    pub fn parse(value: &str) -> Self {
        let mut set = Self::default();
        let mut items = value.split(',').peekable();
        while let Some(item) = items.next() {
            // An empty item followed by another empty item means that the
            // comma itself is part of the set (",,").
            if item.is_empty() {
                if items.peek() == Some(&"") {
                    items.next();
                    set.insert(b',');
                }
                continue;
            }
            if item == "@" {
                for b in 0..=255_u8 {
                    if b.is_ascii_alphabetic() {
                        set.insert(b);
                    }
                }
                continue;
            }
            let (lo, hi) = match item.find('-') {
                Some(i) if i > 0 && i + 1 < item.len() => {
                    (Self::byte(&item[..i]), Self::byte(&item[i + 1..]))
                }
                _ => (Self::byte(item), Self::byte(item)),
            };
            if let (Some(lo), Some(hi)) = (lo, hi) {
                for b in lo..=hi {
                    set.insert(b);
                }
            }
        }
        set
    }

    fn byte(s: &str) -> Option<u8> {
        if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => u8::try_from(c as u32).ok(),
                _ => None,
            }
        }
    }

    pub fn insert(&mut self, b: u8) {
        self.0.set(b as usize, true);
    }

    pub fn contains(&self, c: char) -> bool {
        match u8::try_from(c as u32) {
            Ok(b) => self.0[b as usize],
            Err(_) => false,
        }
    }
}

/// Classifier implementing Vim's default option values.
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    ident: Latin1Set,
    keyword: Latin1Set,
    fname: Latin1Set,
}

impl DefaultClassifier {
    pub const ISIDENT: &'static str = "@,48-57,_,192-255";
    pub const ISKEYWORD: &'static str = "@,48-57,_,192-255";
    pub const ISFNAME: &'static str = "@,48-57,/,.,-,_,+,,,#,$,%,~,=";

    pub fn new() -> Self {
        Self::with_options(Self::ISIDENT, Self::ISKEYWORD, Self::ISFNAME)
    }

    /// Creates a classifier from option strings in the `isident` syntax.
    pub fn with_options(ident: &str, keyword: &str, fname: &str) -> Self {
        Self {
            ident: Latin1Set::parse(ident),
            keyword: Latin1Set::parse(keyword),
            fname: Latin1Set::parse(fname),
        }
    }
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CharClassifier for DefaultClassifier {
    fn is_ident(&self, c: char) -> bool {
        self.ident.contains(c)
    }

    fn is_keyword(&self, c: char) -> bool {
        if (c as u32) < 0x100 {
            self.keyword.contains(c)
        } else {
            c.is_alphanumeric() || c == '_'
        }
    }

    fn is_fname(&self, c: char) -> bool {
        (c as u32) >= 0x100 || self.fname.contains(c)
    }

    fn is_print(&self, c: char) -> bool {
        let c = c as u32;
        (0x20..0x7f).contains(&c) || c >= 0xa0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{CharClassifier, DefaultClassifier, Latin1Set};

    #[test]
    fn latin1_set() {
        let set = Latin1Set::parse("@,48-57,_,192-255");
        assert!(set.contains('a'));
        assert!(set.contains('Z'));
        assert!(set.contains('5'));
        assert!(set.contains('_'));
        assert!(set.contains('é'));
        assert!(!set.contains('-'));
        assert!(!set.contains(' '));

        let set = Latin1Set::parse("/,.,-,+,,,#");
        assert!(set.contains(','));
        assert!(set.contains('-'));
        assert!(set.contains('#'));
        assert!(!set.contains('a'));
    }

    #[test]
    fn default_classifier() {
        let c = DefaultClassifier::new();

        assert!(c.is_ident('x'));
        assert!(!c.is_ident('.'));
        assert!(c.is_keyword('λ'));
        assert!(!c.is_keyword('-'));
        assert!(c.is_fname('/'));
        assert!(c.is_fname('~'));
        assert!(!c.is_fname(' '));
        assert!(c.is_print(' '));
        assert!(!c.is_print('\x7f'));
        assert!(!c.is_print('\t'));

        assert_eq!(c.word_class(' '), 0);
        assert_eq!(c.word_class('.'), 1);
        assert_eq!(c.word_class('a'), 2);
        assert_eq!(c.fold('Ä'), 'ä');
        assert_eq!(c.to_upper('ß'), 'ß');
        assert!(c.is_composing('\u{301}'));
    }
}
