/*! A backtracking regular expression engine for Vim's pattern language.

The crate compiles patterns written in the language used by the Vim editor
(magic levels, `\{n,m}` repetitions, `\@<=` lookbehind, `\@>` atomic groups,
`\zs`/`\ze`, backreferences, `\%l`/`\%c`/`\%v` position assertions, etc) and
matches them against text that may span multiple lines.

There are two main types in this crate: [`Program`] and [`Searcher`]. A
program is produced by [`compile`] from the pattern's source, and can be
shared by any number of searchers. A searcher holds the settings for a
search, like whether case is ignored or the time limit, and finds matches of
a program in a [`TextSource`].

# Example

```rust
use vimre::{CompileOptions, Position, Searcher, SingleLine};

let program = vimre::compile(r"\<\(\w\+\) \1\>", &CompileOptions::new()).unwrap();
let text = SingleLine::new("this is is a test");

let m = Searcher::new(&program)
    .find(&text, Position::at(0))
    .unwrap()
    .unwrap();

assert_eq!(m.span().range(), Some(5..10));
```
*/

use std::time::Duration;

pub use backtrack::compile;
pub use backtrack::Cmp;
pub use backtrack::CompileOptions;
pub use backtrack::MagicLevel;
pub use backtrack::Program;
pub use backtrack::MAX_LIMIT;
pub use backtrack::NSUBEXP;

pub use classes::CharClassifier;
pub use classes::DefaultClassifier;
pub use classes::Latin1Set;

pub use errors::CompileError;
pub use errors::MatchError;

pub use searcher::Engine;
pub use searcher::ExternalTexts;
pub use searcher::MatchConfig;
pub use searcher::MatchResult;
pub use searcher::Searcher;
pub use searcher::DEFAULT_MAX_MEM;

pub use text::Context;
pub use text::Lines;
pub use text::Position;
pub use text::SingleLine;
pub use text::Span;
pub use text::TextSource;
pub use text::Visual;
pub use text::VisualMode;

mod backtrack;
mod classes;
mod errors;
mod searcher;
mod text;

#[cfg(test)]
mod tests;

/// Finds the first match of `program` at or after `start`.
///
/// This is a shortcut for the most common settings of a [`Searcher`].
///
/// The `timeout` only applies while the matcher runs. Lines that don't
/// contain the literal every match must include are skipped without
/// running it, so a pattern that would time out on such a line returns
/// `Ok(None)` instead of [`MatchError::Timeout`]. Use
/// [`Searcher::disable_optimizations`] to run the matcher everywhere.
pub fn search(
    program: &Program,
    src: &dyn TextSource,
    start: Position,
    ignore_case: bool,
    timeout: Option<Duration>,
) -> Result<Option<MatchResult>, MatchError> {
    let mut searcher = Searcher::new(program);
    searcher.ignore_case(ignore_case);
    if let Some(timeout) = timeout {
        searcher.set_timeout(timeout);
    }
    searcher.find(src, start)
}
