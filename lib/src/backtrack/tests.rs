use pretty_assertions::assert_eq;

use super::{compile, CompileOptions, MagicLevel};
use crate::{MatchError, Position, Searcher, SingleLine};

macro_rules! assert_re_code {
    ($re:expr, $code:expr) => {{
        let program = compile($re, &CompileOptions::new()).unwrap();
        assert_eq!(program.to_string(), $code);
    }};
}

macro_rules! assert_re_error {
    ($re:expr, $message:expr) => {{
        assert_re_error!($re, CompileOptions::new(), $message)
    }};
    ($re:expr, $options:expr, $message:expr) => {{
        let err = compile($re, &$options).unwrap_err();
        assert_eq!(err.message, $message, "pattern: {:?}", $re);
        err
    }};
}

#[test]
fn re_code_1() {
    assert_re_code!(
        "abc",
        r#"
00000: BRANCH -> 0000b
00003: EXACTLY "abc" -> 0000b
0000b: END
"#
    );
}

#[test]
fn re_code_2() {
    assert_re_code!(
        "a*",
        r#"
00000: BRANCH -> 0000c
00003: STAR -> 0000c
00006: EXACTLY "a"
0000c: END
"#
    );
}

#[test]
fn re_code_3() {
    assert_re_code!(
        r"a\|b",
        r#"
00000: BRANCH -> 00009
00003: EXACTLY "a" -> 00012
00009: BRANCH -> 00012
0000c: EXACTLY "b" -> 00012
00012: END
"#
    );
}

#[test]
fn re_code_4() {
    assert_re_code!(
        r"\(a\)\1",
        r#"
00000: BRANCH -> 00018
00003: MOPEN 1 -> 00007
00007: BRANCH -> 00010
0000a: EXACTLY "a" -> 00010
00010: MCLOSE 1 -> 00014
00014: BACKREF 1 -> 00018
00018: END
"#
    );
}

#[test]
fn re_code_5() {
    // Complex operand, the star becomes a loop with BACK.
    assert_re_code!(
        r"\(ab\)*",
        r#"
00000: BRANCH -> 00021
00003: BRANCH -> 0001b
00006: MOPEN 1 -> 0000a
0000a: BRANCH -> 00014
0000d: EXACTLY "ab" -> 00014
00014: MCLOSE 1 -> 00018
00018: BACK -> 00003
0001b: BRANCH -> 0001e
0001e: NOTHING -> 00021
00021: END
"#
    );
}

#[test]
fn re_code_6() {
    assert_re_code!(
        r"a\{2,3}",
        r#"
00000: BRANCH -> 00017
00003: BRACE_LIMITS 2 3 -> 0000e
0000e: BRACE_SIMPLE -> 00017
00011: EXACTLY "a"
00017: END
"#
    );

    // Lazy repetitions have the limits reversed.
    assert_re_code!(
        r"a\{-2,3}",
        r#"
00000: BRANCH -> 00017
00003: BRACE_LIMITS 3 2 -> 0000e
0000e: BRACE_SIMPLE -> 00017
00011: EXACTLY "a"
00017: END
"#
    );

    // A range written backwards is lazy too, and kept as is.
    assert_re_code!(
        r"a\{3,1}",
        r#"
00000: BRANCH -> 00017
00003: BRACE_LIMITS 3 1 -> 0000e
0000e: BRACE_SIMPLE -> 00017
00011: EXACTLY "a"
00017: END
"#
    );
}

#[test]
fn re_code_7() {
    assert_re_code!(
        r"a\(b\)\@=",
        r#"
00000: BRANCH -> 00020
00003: EXACTLY "a" -> 00009
00009: MATCH -> 00020
0000c: MOPEN 1 -> 00010
00010: BRANCH -> 00019
00013: EXACTLY "b" -> 00019
00019: MCLOSE 1 -> 0001d
0001d: END
00020: END
"#
    );
}

#[test]
fn re_code_8() {
    assert_re_code!(
        r"\(a\)\@<=b",
        r#"
00000: BRANCH -> 00027
00003: BEHIND 0 -> 00021
0000a: MOPEN 1 -> 0000e
0000e: BRANCH -> 00017
00011: EXACTLY "a" -> 00017
00017: MCLOSE 1 -> 0001b
0001b: BHPOS -> 0001e
0001e: END
00021: EXACTLY "b" -> 00027
00027: END
"#
    );
}

#[test]
fn re_code_9() {
    assert_re_code!(
        "[a-c]",
        r#"
00000: BRANCH -> 00014
00003: ANYOF 0x61-0x63 -> 00014
00014: END
"#
    );

    assert_re_code!(
        r"\<foo",
        r#"
00000: BRANCH -> 0000e
00003: BOW -> 00006
00006: EXACTLY "foo" -> 0000e
0000e: END
"#
    );
}

#[test]
fn literal_star_at_start() {
    // With magic a `*` at the start of the pattern is an ordinary
    // character.
    assert_re_code!(
        "*a",
        r#"
00000: BRANCH -> 0000a
00003: EXACTLY "*a" -> 0000a
0000a: END
"#
    );
}

#[test]
fn hints() {
    let program = compile("^foo", &CompileOptions::new()).unwrap();
    assert!(program.anchored());
    assert_eq!(program.start_char(), Some('f'));

    let program = compile(r"\<foo", &CompileOptions::new()).unwrap();
    assert!(!program.anchored());
    assert_eq!(program.start_char(), Some('f'));
    assert_eq!(program.must_literal(), Some(b"foo".as_slice()));

    let program = compile("a*bcd", &CompileOptions::new()).unwrap();
    assert_eq!(program.start_char(), None);
    assert_eq!(program.must_literal(), Some(b"bcd".as_slice()));

    // More than one alternative, no hints at all.
    let program = compile(r"foo\|bar", &CompileOptions::new()).unwrap();
    assert!(!program.anchored());
    assert_eq!(program.start_char(), None);
    assert_eq!(program.must_literal(), None);
}

#[test]
fn program_properties() {
    let program = compile(r"\(a\)\(b\)\%(c\)", &CompileOptions::new()).unwrap();
    assert_eq!(program.capture_count(), 2);
    assert!(!program.has_newline());
    assert!(!program.has_lookbehind());
    assert_eq!(program.case_override(), None);

    let program = compile(r"a\_sb\c", &CompileOptions::new()).unwrap();
    assert!(program.has_newline());
    assert_eq!(program.case_override(), Some(true));

    let program = compile(r"\Ca\c", &CompileOptions::new()).unwrap();
    assert_eq!(program.case_override(), Some(true));

    let program = compile(r"\(a\)\@<!b\C", &CompileOptions::new()).unwrap();
    assert!(program.has_lookbehind());
    assert_eq!(program.case_override(), Some(false));

    let program = compile(r"e\Z", &CompileOptions::new()).unwrap();
    assert!(program.ignore_combining());
}

#[test]
fn engine_prefix() {
    let with_prefix = compile(r"\%#=1abc", &CompileOptions::new()).unwrap();
    let without_prefix = compile("abc", &CompileOptions::new()).unwrap();
    assert_eq!(with_prefix.code(), without_prefix.code());

    // Error positions are relative to the original pattern.
    let err = assert_re_error!(r"\%#=2a\(", r"unmatched \(");
    assert_eq!(err.position, Some(8));
}

#[test]
fn magic_levels() {
    let very_magic =
        compile(r"\v(a|b)+", &CompileOptions::new()).unwrap();
    let magic = compile(r"\(a\|b\)\+", &CompileOptions::new()).unwrap();
    assert_eq!(very_magic.code(), magic.code());

    let very_nomagic = compile(r"a.b", &CompileOptions::new().magic(MagicLevel::None))
        .unwrap();
    let escaped = compile(r"a\.b", &CompileOptions::new()).unwrap();
    assert_eq!(very_nomagic.code(), escaped.code());
}

#[test]
fn compile_errors() {
    let err = assert_re_error!(r"a\(", r"unmatched \(");
    assert_eq!(err.position, Some(3));

    assert_re_error!(r"\va(", "unmatched (");
    assert_re_error!(r"a\)", r"unmatched \)");
    assert_re_error!(r"\v*a", "* follows nothing");
    assert_re_error!(r"\v+a", "+ follows nothing");
    assert_re_error!(r"a**", "nested *");
    assert_re_error!(r"\va{1,2}{1,2}", "nested {");
    assert_re_error!(r"a\{1,2", r"syntax error in \{...}");
    assert_re_error!(r"a\@x", r"invalid character after \@");
    assert_re_error!(r"\1\(a\)", "illegal back reference");
    assert_re_error!(r"a\zsb\zs*", r"cannot repeat \zs");
    assert_re_error!(r"\%[]", r"empty \%[]");
    assert_re_error!(r"\%[abc", r"missing ] after \%[");
    assert_re_error!(r"\%[a\(b\)]", r"invalid item in \%[]");
    assert_re_error!(r"\%q", r"invalid character after \%");
    assert_re_error!(r"\zx", r"invalid character after \z");
    assert_re_error!(r"\z(a\)", r"\z( not allowed here");
    assert_re_error!(r"\z1", r"\z1 - \z9 not allowed here");
    assert_re_error!("~", "no previous substitute regular expression");
    assert_re_error!(
        r"\(a\)\(b\)\(c\)\(d\)\(e\)\(f\)\(g\)\(h\)\(i\)\(j\)",
        r"too many \("
    );
    assert_re_error!(
        &r"\%(ab\)\{2}".repeat(11),
        r"too many complex \{...}s"
    );
    assert_re_error!(&r"\v%(ab){2}".repeat(11), "too many complex {...}s");
}

#[test]
fn pattern_too_long() {
    // Each `a*` takes 9 bytes, the program doesn't fit in 16-bit offsets.
    let err = assert_re_error!(&"a*".repeat(8000), "pattern too long");
    assert_eq!(err.position, Some(0));

    // A literal longer than an EXACTLY node can hold.
    assert_re_error!(&"a".repeat(70000), "pattern too long");

    assert!(compile(&"a*".repeat(7000), &CompileOptions::new()).is_ok());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "corrupted program"))]
fn corrupted_program() {
    let mut program = compile("abc", &CompileOptions::new()).unwrap();
    // Replace the EXACTLY node with an unknown opcode.
    program.code[3] = 0xff;

    let text = SingleLine::new("abc");
    assert_eq!(
        Searcher::new(&program).find(&text, Position::default()),
        Err(MatchError::Corrupted { addr: 3 })
    );
}

#[test]
fn strict_mode() {
    // Without strict mode an unterminated collection is a literal `[`.
    assert!(compile("[abc", &CompileOptions::new()).is_ok());

    assert_re_error!("[abc", CompileOptions::new().strict(true), "missing ] after [");
}

#[test]
fn external_groups() {
    let options = CompileOptions::new().allow_external(true);
    let program = compile(r"\z(a\)b", &options).unwrap();
    assert!(program.has_external());
    assert!(program.sets_external());

    let program = compile(r"\z1b", &options).unwrap();
    assert!(program.has_external());
    assert!(!program.sets_external());
}

#[test]
fn previous_substitute() {
    let options = CompileOptions::new().prev_sub(Some("xy"));
    let program = compile("a~b", &options).unwrap();
    let literal = compile("axyb", &CompileOptions::new()).unwrap();
    // `~` produces its own EXACTLY node.
    assert_ne!(program.code(), literal.code());
    assert_eq!(program.capture_count(), 0);
}
