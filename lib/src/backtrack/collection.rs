/*! Parsing of collections like `[a-z]`, `[^0-9]` or `[[:alpha:]_]`.

Inside a collection the magic level doesn't matter, and only a few
backslash sequences are special. The result is a [`Collection`] with the
character ranges and named classes that the set includes.
*/

use smallvec::{smallvec, SmallVec};

use crate::backtrack::instr::PosixClass;
use crate::backtrack::lexer::{backslash_trans, INRANGE};
use crate::errors::CompileError;
use crate::text::decode_char;

/// Backslash sequences accepted inside a collection, besides the ones in
/// [`INRANGE`].
const ABBR: &[u8] = b"nrtebdoxuU";

/// Families of Latin-1 characters that are considered equivalent by
/// `[=x=]`.
const EQUIVALENCES: &[&str] = &[
    "AÀÁÂÃÄÅ",
    "aàáâãäå",
    "CÇ",
    "cç",
    "EÈÉÊË",
    "eèéêë",
    "IÌÍÎÏ",
    "iìíîï",
    "NÑ",
    "nñ",
    "OÒÓÔÕÖØ",
    "oòóôõöø",
    "UÙÚÛÜ",
    "uùúûü",
    "YÝ",
    "yýÿ",
];

/// A parsed collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Collection {
    /// `[^...]`
    pub negated: bool,
    /// The collection also matches a line break.
    pub nl: bool,
    /// Inclusive ranges of code points.
    pub ranges: SmallVec<[(u32, u32); 8]>,
    /// Bitmap with the [`PosixClass`]es included in the collection.
    pub classes: u32,
}

impl Collection {
    fn add_char(&mut self, c: char) {
        self.add_range(c as u32, c as u32);
    }

    fn add_range(&mut self, lo: u32, hi: u32) {
        // Overlapping or adjacent ranges are merged.
        if let Some(last) = self.ranges.last_mut() {
            if last.0 <= lo && lo <= last.1 + 1 {
                last.1 = last.1.max(hi);
                return;
            }
        }
        self.ranges.push((lo, hi));
    }
}

fn byte_at(src: &[u8], pos: usize) -> u8 {
    src.get(pos).copied().unwrap_or(0)
}

fn is_escape(src: &[u8], pos: usize) -> bool {
    byte_at(src, pos) == b'\\' && {
        let next = byte_at(src, pos + 1);
        next != 0 && (INRANGE.contains(&next) || ABBR.contains(&next))
    }
}

/// If `[:name:]` starts at `pos`, returns the class and the position after
/// the closing `]`.
fn char_class(src: &[u8], pos: usize) -> Option<(PosixClass, usize)> {
    if byte_at(src, pos) != b'[' || byte_at(src, pos + 1) != b':' {
        return None;
    }
    let rest = &src[pos + 2..];
    PosixClass::NAMES.iter().find_map(|(name, class)| {
        let name = name.as_bytes();
        if rest.starts_with(name) && rest[name.len()..].starts_with(b":]") {
            Some((*class, pos + 2 + name.len() + 2))
        } else {
            None
        }
    })
}

/// If `[=x=]` starts at `pos`, returns `x` and the position after the
/// closing `]`.
fn equi_class(src: &[u8], pos: usize) -> Option<(char, usize)> {
    delimited_char(src, pos, b'=')
}

/// If `[.x.]` starts at `pos`, returns `x` and the position after the
/// closing `]`.
fn coll_element(src: &[u8], pos: usize) -> Option<(char, usize)> {
    delimited_char(src, pos, b'.')
}

fn delimited_char(src: &[u8], pos: usize, delim: u8) -> Option<(char, usize)> {
    if byte_at(src, pos) != b'[' || byte_at(src, pos + 1) != delim {
        return None;
    }
    let (c, len) = decode_char(src, pos + 2)?;
    let end = pos + 2 + len;
    if byte_at(src, end) == delim && byte_at(src, end + 1) == b']' {
        Some((c, end + 2))
    } else {
        None
    }
}

fn equivalents(c: char) -> SmallVec<[char; 8]> {
    EQUIVALENCES
        .iter()
        .find(|family| family.contains(c))
        .map(|family| family.chars().collect())
        .unwrap_or_else(|| smallvec![c])
}

/// Skips over a collection, starting right after the opening `[`.
/// Returns the position where the scan stopped, which is a `]` if the
/// collection is properly terminated.
pub(crate) fn skip_anyof(src: &[u8], mut pos: usize) -> usize {
    if byte_at(src, pos) == b'^' {
        pos += 1;
    }
    if matches!(byte_at(src, pos), b']' | b'-') {
        pos += 1;
    }
    while pos < src.len() && src[pos] != b']' {
        let len = decode_char(src, pos).map_or(1, |(_, len)| len);
        if len > 1 {
            pos += len;
        } else if src[pos] == b'-' {
            pos += 1;
            if pos < src.len() && src[pos] != b']' {
                pos += decode_char(src, pos).map_or(1, |(_, len)| len);
            }
        } else if is_escape(src, pos) {
            pos += 2;
        } else if src[pos] == b'[' {
            let end = char_class(src, pos)
                .map(|(_, end)| end)
                .or_else(|| equi_class(src, pos).map(|(_, end)| end))
                .or_else(|| coll_element(src, pos).map(|(_, end)| end));
            pos = end.unwrap_or(pos + 1);
        } else {
            pos += 1;
        }
    }
    pos
}

/// Parses the code after `\d`, `\o`, `\x`, `\u` or `\U`. `pos` points to
/// the letter. If the number is invalid the result is a backslash, and the
/// position is left at the letter.
pub(crate) fn coll_get_char(src: &[u8], pos: usize) -> (u32, usize) {
    let (radix, max_len) = match byte_at(src, pos) {
        b'd' => (10, usize::MAX),
        b'o' => (8, 11),
        b'x' => (16, 2),
        b'u' => (16, 4),
        b'U' => (16, 8),
        _ => return ('\\' as u32, pos),
    };
    let mut n: u64 = 0;
    let mut len = 0;
    while len < max_len {
        match (byte_at(src, pos + 1 + len) as char).to_digit(radix) {
            Some(d) => {
                n = n.saturating_mul(radix as u64).saturating_add(d as u64);
                len += 1;
            }
            None => break,
        }
    }
    if len == 0 || n > i32::MAX as u64 {
        return ('\\' as u32, pos);
    }
    (n as u32, pos + 1 + len)
}

/// Parses a collection starting right after the opening `[`, which must be
/// known to be terminated (see [`skip_anyof`]). Returns the collection and
/// the position of the closing `]`.
pub(crate) fn parse(
    src: &[u8],
    start: usize,
    nl: bool,
    strict: bool,
) -> Result<(Collection, usize), CompileError> {
    let mut coll = Collection { nl, ..Default::default() };
    let mut pos = start;
    // Set when the next `-` forms a range.
    let mut startc: Option<u32> = None;

    if byte_at(src, pos) == b'^' {
        coll.negated = true;
        pos += 1;
    }

    // At the start `]` and `-` are literals.
    if matches!(byte_at(src, pos), b']' | b'-') {
        startc = Some(src[pos] as u32);
        coll.add_char(src[pos] as char);
        pos += 1;
    }

    while pos < src.len() && src[pos] != b']' {
        if src[pos] == b'-' {
            pos += 1;
            // A `-` at the end, or after or before `\n`, is a literal.
            let endc_follows = pos < src.len()
                && src[pos] != b']'
                && !(src[pos] == b'\\' && byte_at(src, pos + 1) == b'n');
            match startc {
                Some(lo) if endc_follows => {
                    let mut hi = match coll_element(src, pos) {
                        Some((c, end)) => {
                            pos = end;
                            c as u32
                        }
                        None => {
                            let (c, len) =
                                decode_char(src, pos).unwrap_or(('\0', 1));
                            pos += len;
                            c as u32
                        }
                    };
                    if hi == '\\' as u32 {
                        let (c, end) = coll_get_char(src, pos);
                        hi = c;
                        pos = end;
                    }
                    if lo > hi {
                        return Err(CompileError::new(
                            "reverse range in character class",
                            pos,
                        ));
                    }
                    if (lo >= 0x80 || hi >= 0x80) && hi > lo + 256 {
                        return Err(CompileError::new(
                            "range too large in character class",
                            pos,
                        ));
                    }
                    coll.add_range(lo, hi);
                    startc = None;
                }
                _ => {
                    coll.add_char('-');
                    // [--x] is a range
                    startc = Some('-' as u32);
                }
            }
        } else if is_escape(src, pos) {
            pos += 1;
            match src[pos] {
                b'n' => {
                    // `\n` doesn't change what `[^...]` matches.
                    if !coll.negated {
                        coll.nl = true;
                    }
                    pos += 1;
                    startc = None;
                }
                b'd' | b'o' | b'x' | b'u' | b'U' => {
                    let (c, end) = coll_get_char(src, pos);
                    if end == pos {
                        // Not a valid code, the backslash is a literal and
                        // the letter is parsed again.
                        coll.add_char('\\');
                        startc = Some('\\' as u32);
                    } else {
                        let c = if c == 0 { 0x0a } else { c };
                        if let Some(ch) = char::from_u32(c) {
                            coll.add_char(ch);
                        }
                        startc = Some(c);
                        pos = end;
                    }
                }
                b => {
                    let c = backslash_trans(b as char);
                    coll.add_char(c);
                    startc = Some(c as u32);
                    pos += 1;
                }
            }
        } else if src[pos] == b'[' {
            startc = None;
            if let Some((class, end)) = char_class(src, pos) {
                coll.classes |= 1 << class as u32;
                pos = end;
            } else if let Some((c, end)) = equi_class(src, pos) {
                for c in equivalents(c) {
                    coll.add_char(c);
                }
                pos = end;
            } else if let Some((c, end)) = coll_element(src, pos) {
                coll.add_char(c);
                pos = end;
            } else {
                // A literal `[`, allows [[-x] as a range.
                coll.add_char('[');
                startc = Some('[' as u32);
                pos += 1;
            }
        } else {
            if strict && src[pos] == b'\\' {
                return Err(CompileError::new(
                    "unknown escape in collection",
                    pos,
                ));
            }
            let (c, len) = decode_char(src, pos).unwrap_or(('\0', 1));
            coll.add_char(c);
            startc = Some(c as u32);
            pos += len;
        }
    }

    Ok((coll, pos))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{parse, skip_anyof, Collection};
    use crate::backtrack::instr::PosixClass;

    fn collection(s: &str) -> Collection {
        let src = s.as_bytes();
        let end = skip_anyof(src, 1);
        assert_eq!(src.get(end), Some(&b']'), "unterminated: {}", s);
        let (coll, pos) = parse(src, 1, false, false).unwrap();
        assert_eq!(pos, end);
        coll
    }

    #[test]
    fn ranges() {
        let coll = collection("[a-cx]");
        assert_eq!(coll.ranges.as_slice(), &[(0x61, 0x63), (0x78, 0x78)]);
        assert!(!coll.negated);

        let coll = collection("[^]a-]");
        assert!(coll.negated);
        assert_eq!(
            coll.ranges.as_slice(),
            &[(0x5d, 0x5d), (0x61, 0x61), (0x2d, 0x2d)]
        );

        let coll = collection(r"[\x41-\x43\n]");
        assert_eq!(coll.ranges.as_slice(), &[(0x41, 0x43)]);
        assert!(coll.nl);

        let coll = collection(r"[^\n]");
        assert!(!coll.nl);
    }

    #[test]
    fn classes() {
        let coll = collection("[[:alpha:][:digit:]_]");
        assert_eq!(
            coll.classes,
            (1 << PosixClass::Alpha as u32) | (1 << PosixClass::Digit as u32)
        );
        assert_eq!(coll.ranges.as_slice(), &[(0x5f, 0x5f)]);

        let coll = collection("[[=e=]]");
        assert_eq!(coll.ranges.len(), 2);
        assert_eq!(coll.ranges[0], (0x65, 0x65));
        assert_eq!(coll.ranges[1], (0xe8, 0xeb));
    }

    #[test]
    fn unterminated() {
        assert_eq!(skip_anyof(b"[abc", 1), 4);
        assert_eq!(skip_anyof(b"[[:alpha:]", 1), 10);
    }

    #[test]
    fn errors() {
        let err = parse(b"[z-a]", 1, false, false).unwrap_err();
        assert_eq!(err.message, "reverse range in character class");

        assert!(parse(br"[\q]", 1, false, false).is_ok());
        let err = parse(br"[\q]", 1, false, true).unwrap_err();
        assert_eq!(err.message, "unknown escape in collection");
    }
}
