/*! End-to-end tests. */
use std::ops::Range;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    compile, CompileOptions, Context, ExternalTexts, Lines, MatchError,
    MatchResult, Position, Searcher, SingleLine, Span, TextSource, Visual,
    VisualMode,
};

/// Finds the first match of `re` in `src`, with and without optimization
/// hints. Both searches must produce the same result.
fn find_with<F>(
    re: &str,
    options: &CompileOptions,
    src: &dyn TextSource,
    setup: F,
) -> Option<MatchResult>
where
    F: Fn(&mut Searcher),
{
    let program = compile(re, options).unwrap();

    let mut searcher = Searcher::new(&program);
    setup(&mut searcher);
    let with_hints = searcher.find(src, Position::default()).unwrap();

    searcher.disable_optimizations(true);
    let without_hints = searcher.find(src, Position::default()).unwrap();

    assert_eq!(
        with_hints, without_hints,
        "\n\n`{}` gives different results without optimizations",
        re
    );

    with_hints
}

fn find(re: &str, text: &str) -> Option<MatchResult> {
    find_with(re, &CompileOptions::new(), &SingleLine::new(text), |_| {})
}

fn range(span: Option<Span>) -> Option<Range<usize>> {
    span.and_then(|span| span.range())
}

macro_rules! assert_match {
    ($re:expr, $text:expr, $expected:expr) => {{
        let m = find($re, $text);
        assert_eq!(
            range(m.map(|m| m.span())),
            Some($expected),
            "\n\n`{}` should match {:?}",
            $re,
            $text
        );
    }};
}

macro_rules! assert_no_match {
    ($re:expr, $text:expr) => {{
        let m = find($re, $text);
        assert!(
            m.is_none(),
            "\n\n`{}` should not match {:?}, but matched at {:?}",
            $re,
            $text,
            m.map(|m| m.span())
        );
    }};
}

#[test]
fn literals() {
    assert_match!("foo", "a foo b", 2..5);
    assert_match!("*a", "x*a", 1..3);
    assert_match!("ñu", "gñu", 1..4);
    assert_no_match!("foo", "fo o");
    assert_match!(r"\%d65", "xA", 1..2);
    assert_match!(r"\%x41\%u00e9", "Aé", 0..3);
    assert_match!(r"\Va.b", "axb a.b", 4..7);
}

#[test]
fn alternatives() {
    // Leftmost-first, not leftmost-longest.
    assert_match!(r"ab\|abc", "abc", 0..2);
    assert_match!(r"abc\|ab", "abc", 0..3);
    assert_match!(r"x\|ab\|abc", "zabc", 1..3);
    assert_match!(r"foobar\&foo", "xfoobar", 1..4);
    assert_no_match!(r"foobar\&foo", "xfoobaz");
}

#[test]
fn repetitions() {
    assert_match!("a*", "aaab", 0..3);
    assert_match!("a*", "baaa", 0..0);
    assert_match!(r"a\+", "baaa", 1..4);
    assert_match!(r"a\=b", "xb", 1..2);
    assert_match!(r"a\?b", "xab", 1..3);

    assert_match!(r"a\{1,3}", "aaaa", 0..3);
    assert_match!(r"a\{-1,3}", "aaaa", 0..1);
    assert_match!(r"a\{2}", "aaa", 0..2);
    assert_match!(r"a\{-}", "aaa", 0..0);
    assert_match!(r"a\{3,1}", "aaaa", 0..1);
    assert_match!(r"\va{3,1}", "aaaa", 0..1);
    assert_no_match!(r"a\{3,2}", "xa");
    assert_no_match!(r"a\{2,3}", "abab");

    assert_match!(r"\(ab\)\{2}", "abababx", 0..4);
    assert_match!(r"\(ab\)\{-1,}", "ababab", 0..2);
    assert_match!(r"\(ab\)\{3,1}", "ababab", 0..2);
    assert_match!(r"\(ab\)*c", "xababc", 1..6);
    assert_match!(r"\%(ab\)\+", "xabab", 1..5);
}

#[test]
fn empty_loops() {
    // An iteration that matches the empty string doesn't loop forever.
    let m = find(r"\(a*\)*", "aaa").unwrap();
    assert_eq!(m.span().range(), Some(0..3));
    assert_eq!(range(m.group(1)), Some(0..3));

    assert_match!(r"\(a*\)*", "b", 0..0);
    assert_match!(r"\(a*\)\+b", "aab", 0..3);
    assert_match!(r"\(a*\)*b", "aab", 0..3);
}

#[test]
fn empty_loops_terminate() {
    // Positions seen at the end of an iteration are remembered for the
    // whole attempt, backtracking into the loop doesn't forget them.
    assert_no_match!(r"\(a*\)*b", "aa");
    assert_no_match!(r"\%(a*\)*b", "aaa");
    assert_no_match!(r"\(\(a\)*\)*b", "aa");
}

#[test]
fn groups() {
    let m = find(r"\(ab\)\1", "xababy").unwrap();
    assert_eq!(m.span().range(), Some(1..5));
    assert_eq!(range(m.group(0)), Some(1..5));
    assert_eq!(range(m.group(1)), Some(1..3));
    assert_eq!(m.group(2), None);

    let m = find(r"\v(\d+)-(\d+)", "tel 12-34").unwrap();
    assert_eq!(m.span().range(), Some(4..9));
    assert_eq!(range(m.group(1)), Some(4..6));
    assert_eq!(range(m.group(2)), Some(7..9));
    assert_eq!(m.groups().filter(|g| g.is_some()).count(), 3);

    // Non-capturing groups don't count.
    let m = find(r"\%(a\)\(b\)", "ab").unwrap();
    assert_eq!(range(m.group(1)), Some(1..2));

    // A group that didn't participate in the match is unset, and a
    // backreference to it matches the empty string.
    let m = find(r"\(x\)\=a\1b", "ab").unwrap();
    assert_eq!(m.span().range(), Some(0..2));
    assert_eq!(m.group(1), None);

    assert_match!(r"\<\(\w\+\) \1\>", "this is is a test", 5..10);
    assert_no_match!(r"\(a\)\1", "ab");
}

#[test]
fn anchors() {
    assert_match!("^foo", "foo", 0..3);
    assert_no_match!("^foo", "afoo");
    assert_match!("foo$", "bar foo", 4..7);
    assert_no_match!("foo$", "foo bar");
    assert_match!(r"\<is\>", "this is", 5..7);
    assert_no_match!(r"\<is\>", "this");
    assert_match!(r"\%^a", "aa", 0..1);
    assert_match!(r"a\%$", "aa", 1..2);
    // `^` in the middle of a pattern is an ordinary character.
    assert_match!("a^b", "xa^b", 1..4);
}

#[test]
fn classes() {
    assert_match!(r"\d\+", "abc 123", 4..7);
    assert_match!(r"\s\S", "a  b", 2..4);
    assert_match!(r"\u\l", "aBc", 1..3);
    assert_match!(r"[[:upper:]]\+", "abCDe", 2..4);
    assert_match!("[^a-c]", "abcd", 3..4);
    assert_match!("[]x]", "a]", 1..2);
    assert_match!("[[=e=]]", "é", 0..2);
    assert_match!(r"\x\+", "zz0fz", 2..4);
    assert_match!("a.c", "abc", 0..3);
    // An unterminated collection is a literal `[`.
    assert_match!("[ab", "x[ab", 1..4);
}

#[test]
fn lookaround() {
    assert_match!(r"foo\(bar\)\@=", "foobaz foobar", 7..10);
    assert_match!(r"foo\(bar\)\@!", "foobar foobaz", 7..10);
    assert_match!(r"\(foo\)\@<=bar", "xbar foobar", 8..11);
    assert_match!(r"\(foo\)\@<!bar", "foobar xbar", 8..11);
    assert_no_match!(r"\(a*\)\@>a", "aaa");
    assert_match!(r"\(a*\)\@>b", "aab", 0..3);
}

#[test]
fn lookahead_groups() {
    // Captures made inside a negative lookahead don't survive it.
    let m = find(r"\%(\(a\)\@!x\|a\)", "a").unwrap();
    assert_eq!(m.span().range(), Some(0..1));
    assert_eq!(m.group(1), None);

    let m = find(r"\(b\)\@!\(a\)", "a").unwrap();
    assert_eq!(m.group(1), None);
    assert_eq!(range(m.group(2)), Some(0..1));

    // A positive lookahead keeps them.
    let m = find(r"\(a\)\@=a", "a").unwrap();
    assert_eq!(m.span().range(), Some(0..1));
    assert_eq!(range(m.group(1)), Some(0..1));
}

#[test]
fn lookbehind_limit() {
    // With a limit the lookbehind looks back at most that many bytes.
    assert_match!(r"\(foo.*\)\@<=bar", "foo  bar", 5..8);
    assert_no_match!(r"\(foo.*\)\@2<=bar", "foo  bar");

    // The limit is inclusive.
    assert_match!(r"\(oo\)\@2<=x", "oox", 2..3);
    assert_no_match!(r"\(oo\)\@1<=x", "oox");
}

#[test]
fn lookbehind_limit_across_lines() {
    let text = Lines::from_text("oo\nx");
    let options = CompileOptions::new();
    let expected = Span::new(Position::new(1, 0), Position::new(1, 1));

    let m = find_with(r"\(oo\n\)\@<=x", &options, &text, |_| {});
    assert_eq!(m.map(|m| m.span()), Some(expected));

    // The line break is not counted when the lookbehind crosses a line
    // boundary, so two bytes are enough for "oo\n".
    let m = find_with(r"\(oo\n\)\@2<=x", &options, &text, |_| {});
    assert_eq!(m.map(|m| m.span()), Some(expected));

    let m = find_with(r"\(oo\n\)\@1<=x", &options, &text, |_| {});
    assert!(m.is_none());
}

#[test]
fn match_start_and_end() {
    assert_match!(r"foo\zsbar", "foobar", 3..6);
    assert_match!(r"foo\zebar", "foobar foo", 0..3);
    assert_match!(r"foo\zebar", "foo foobar", 4..7);
}

#[test]
fn optional_sequence() {
    assert_match!(r"fu\%[nction]", "func", 0..4);
    assert_match!(r"fu\%[nction]", "fux", 0..2);
    assert_match!(r"fu\%[nction]", "function", 0..8);
}

#[test]
fn ignore_case() {
    let text = SingleLine::new("FOO");
    let options = CompileOptions::new();

    let m = find_with("foo", &options, &text, |s| {
        s.ignore_case(true);
    });
    assert_eq!(range(m.map(|m| m.span())), Some(0..3));

    assert_no_match!("foo", "FOO");
    assert_match!(r"\cfoo", "FOO", 0..3);
    assert_match!(r"foo\c", "xFoO", 1..4);
    assert_match!("[a-c]\\c", "B", 0..1);

    let m = find_with(r"\Cfoo", &options, &text, |s| {
        s.ignore_case(true);
    });
    assert!(m.is_none());
}

#[test]
fn previous_substitute() {
    let options = CompileOptions::new().prev_sub(Some("xy"));
    let m = find_with("a~", &options, &SingleLine::new("zaxy"), |_| {});
    assert_eq!(range(m.map(|m| m.span())), Some(1..4));
}

#[test]
fn multiple_lines() {
    let text = Lines::from_text("foo\nbar\nbaz");
    let options = CompileOptions::new();

    let m = find_with(r"foo\nbar", &options, &text, |_| {}).unwrap();
    assert_eq!(
        m.span(),
        Span::new(Position::new(0, 0), Position::new(1, 3))
    );
    assert_eq!(m.span().range(), None);

    let m = find_with("^bar", &options, &text, |_| {}).unwrap();
    assert_eq!(m.span(), Span::new(Position::new(1, 0), Position::new(1, 3)));

    let m = find_with(r"o\_s\+b", &options, &text, |_| {}).unwrap();
    assert_eq!(m.span(), Span::new(Position::new(0, 2), Position::new(1, 1)));

    // A backreference to a group that spans lines.
    let text = Lines::from_text("r\nbar\nba");
    let m = find_with(r"\(r\nb\)a\1", &options, &text, |_| {}).unwrap();
    assert_eq!(m.span(), Span::new(Position::new(0, 0), Position::new(2, 1)));

    // A single-line source never matches a line break.
    let m = find_with(r"a\nb", &options, &SingleLine::new("a\nb"), |_| {});
    assert!(m.is_none());

    // Unless the pattern is compiled in string mode.
    let options = CompileOptions::new().string_mode(true);
    let m = find_with(r"a\nb", &options, &SingleLine::new("a\nb"), |_| {});
    assert_eq!(range(m.map(|m| m.span())), Some(0..3));
}

#[test]
fn start_position() {
    let program = compile("foo", &CompileOptions::new()).unwrap();
    let text = Lines::from_text("foo\nfoo foo");
    let searcher = Searcher::new(&program);

    let m = searcher.find(&text, Position::new(0, 1)).unwrap().unwrap();
    assert_eq!(m.span().start, Position::new(1, 0));

    let m = searcher.find(&text, Position::new(1, 1)).unwrap().unwrap();
    assert_eq!(m.span().start, Position::new(1, 4));

    assert!(searcher.find(&text, Position::new(1, 5)).unwrap().is_none());
}

#[test]
fn find_all() {
    let program = compile(r"o\+", &CompileOptions::new()).unwrap();
    let text = SingleLine::new("foo boo");
    let matches = Searcher::new(&program)
        .find_all(&text, Position::default())
        .unwrap();
    assert_eq!(
        matches.iter().map(|m| m.span().range().unwrap()).collect::<Vec<_>>(),
        vec![1..3, 5..7]
    );

    let program = compile("a", &CompileOptions::new()).unwrap();
    let text = Lines::from_text("a\nba\n");
    let matches = Searcher::new(&program)
        .find_all(&text, Position::default())
        .unwrap();
    assert_eq!(
        matches.iter().map(|m| m.span().start).collect::<Vec<_>>(),
        vec![Position::new(0, 0), Position::new(1, 1)]
    );
}

#[test]
fn positions() {
    assert_match!(r"\%5cb", "aaaab", 4..5);
    assert_no_match!(r"\%4cb", "aaaab");
    assert_match!(r"\%>2ca", "aaaa", 2..3);
    assert_match!(r"\%<3ca\+", "xaaaa", 1..5);
    assert_match!(r"\%9vx", "\tx", 1..2);

    let text = Lines::from_text("bar\nbar");
    let options = CompileOptions::new();

    let m = find_with(r"\%2lbar", &options, &text, |_| {}).unwrap();
    assert_eq!(m.span().start, Position::new(1, 0));

    let m = find_with(r"\%11lbar", &options, &text, |s| {
        s.set_context(Context::new().with_first_line(10));
    })
    .unwrap();
    assert_eq!(m.span().start, Position::new(1, 0));

    // Line numbers don't apply to single-line sources.
    assert_no_match!(r"\%1lbar", "bar");
}

#[test]
fn cursor_and_marks() {
    let text = SingleLine::new("foo foo");
    let options = CompileOptions::new();

    let m = find_with(r"\%#foo", &options, &text, |s| {
        s.set_context(Context::new().with_cursor(Position::new(0, 4)));
    });
    assert_eq!(range(m.map(|m| m.span())), Some(4..7));

    // Without a cursor `\%#` never matches.
    assert_no_match!(r"\%#foo", "foo foo");

    let m = find_with(r"\%'mfoo", &options, &text, |s| {
        s.set_context(Context::new().with_mark('m', Position::new(0, 4)));
    });
    assert_eq!(range(m.map(|m| m.span())), Some(4..7));

    let m = find_with(r"\%<'mfoo", &options, &text, |s| {
        s.set_context(Context::new().with_mark('m', Position::new(0, 4)));
    });
    assert_eq!(range(m.map(|m| m.span())), Some(0..3));

    // Relative line number, the same line as the cursor.
    let lines = Lines::from_text("bar\nbar");
    let m = find_with(r"\%.lbar", &options, &lines, |s| {
        s.set_context(Context::new().with_cursor(Position::new(1, 0)));
    })
    .unwrap();
    assert_eq!(m.span().start, Position::new(1, 0));

    assert!(find_with(r"\%.lbar", &options, &lines, |_| {}).is_none());
}

#[test]
fn visual_area() {
    let text = Lines::from_text("foo foo");
    let visual = Visual {
        start: Position::new(0, 4),
        end: Position::new(0, 6),
        mode: VisualMode::Char,
    };

    let m = find_with(r"\%Vfoo", &CompileOptions::new(), &text, |s| {
        s.set_context(Context::new().with_visual(visual));
    })
    .unwrap();
    assert_eq!(m.span().range(), Some(4..7));

    let m = find_with(r"\%Vfoo", &CompileOptions::new(), &text, |_| {});
    assert!(m.is_none());
}

#[test]
fn external_groups() {
    let options = CompileOptions::new().allow_external(true);

    let m = find_with(r"\z(\w\+\)", &options, &SingleLine::new("hello world"), |_| {})
        .unwrap();
    assert_eq!(range(m.external(1)), Some(0..5));
    assert_eq!(m.external_texts().get(1), Some(b"hello".as_slice()));

    let texts = m.external_texts().clone();
    let m = find_with(r"\z1", &options, &SingleLine::new("say hello"), |s| {
        s.set_external_texts(texts.clone());
    });
    assert_eq!(range(m.map(|m| m.span())), Some(4..9));

    let m = find_with(r"x\z1y", &options, &SingleLine::new("xy"), |s| {
        s.set_external_texts(ExternalTexts::new());
    });
    assert_eq!(range(m.map(|m| m.span())), Some(0..2));
}

#[test]
fn timeout() {
    let program = compile(r"\(a*\)*b", &CompileOptions::new()).unwrap();
    let text = "a".repeat(40);
    let text = SingleLine::new(text.as_str());

    // No memory limit, the deadline must be what stops the search.
    let mut searcher = Searcher::new(&program);
    searcher
        .set_timeout(Duration::from_millis(50))
        .set_max_mem(usize::MAX)
        .disable_optimizations(true);

    assert_eq!(
        searcher.find(&text, Position::default()).unwrap_err(),
        MatchError::Timeout
    );
}

#[test]
fn interrupt() {
    let program = compile(r"\(a*\)*b", &CompileOptions::new()).unwrap();
    let text = "a".repeat(40);
    let text = SingleLine::new(text.as_str());

    let mut searcher = Searcher::new(&program);
    searcher
        .set_interrupt(Arc::new(AtomicBool::new(true)))
        .set_max_mem(usize::MAX)
        .disable_optimizations(true);

    assert_eq!(
        searcher.find(&text, Position::default()).unwrap_err(),
        MatchError::Interrupted
    );
}

#[test]
fn memory_limit() {
    let program = compile(r"a\|b", &CompileOptions::new()).unwrap();
    let mut searcher = Searcher::new(&program);
    searcher.set_max_mem(1);

    assert_eq!(
        searcher.find(&SingleLine::new("b"), Position::default()).unwrap_err(),
        MatchError::TooExpensive
    );
}

#[test]
fn search_shortcut() {
    let program = compile("FOO", &CompileOptions::new()).unwrap();
    let m = crate::search(
        &program,
        &SingleLine::new("a foo"),
        Position::default(),
        true,
        Some(Duration::from_secs(10)),
    )
    .unwrap()
    .unwrap();
    assert_eq!(m.span().range(), Some(2..5));
}
