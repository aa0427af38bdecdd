use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{arg, value_parser, Arg, ArgAction, ArgMatches, Command};
use vimre::{Lines, MatchResult, Position, Searcher, SingleLine, TextSource};
use yansi::Color::{Cyan, Red, Yellow};
use yansi::Paint;

use crate::config::Config;
use crate::help;

#[rustfmt::skip]
pub fn search() -> Command {
    super::command("search")
        .about("Search for a pattern in one or more files")
        .long_about(help::SEARCH_LONG_HELP)
        .arg(
            arg!(<PATTERN>)
                .help("Pattern to search for")
        )
        .arg(
            Arg::new("FILE")
                .required(true)
                .help("Path to the file that will be searched")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
        )
        // Keep options sorted alphabetically by their long name.
        // For instance, --bar goes before --foo.
        .arg(
            arg!(-a --"all")
                .help("Print all the matches in each line, not only the first one")
        )
        .arg(
            arg!(-i --"ignore-case")
                .help("Ignore case, unless the pattern contains \\C")
        )
        .arg(super::magic_arg())
        .arg(
            arg!(--"max-mem" <KIB>)
                .help("Memory limit for backtracking, in KiB")
                .value_parser(value_parser!(usize))
        )
        .arg(
            arg!(--"multiline")
                .help("Search the whole file as a multi-line text")
                .long_help(help::MULTILINE_LONG_HELP)
        )
        .arg(
            arg!(--"no-color")
                .help("Don't highlight matches")
        )
        .arg(
            arg!(-t --"timeout" <SECONDS>)
                .help("Abort a search after the given number of seconds")
                .value_parser(value_parser!(u64).range(1..))
        )
}

pub fn exec_search(args: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let pattern = args.get_one::<String>("PATTERN").unwrap();
    let program = super::compile_pattern(args, config.search.magic)?;

    if args.get_flag("no-color") {
        yansi::disable();
    }

    // With smart case the case is ignored only if the pattern doesn't
    // contain upper-case letters.
    let ignore_case = args.get_flag("ignore-case")
        || (config.search.ignore_case
            && !(config.search.smart_case && has_uppercase(pattern)));

    let timeout = args
        .get_one::<u64>("timeout")
        .map(|secs| Duration::from_secs(*secs))
        .or(config.search.timeout_ms.map(Duration::from_millis));

    let max_mem_kb =
        args.get_one::<usize>("max-mem").copied().or(config.search.max_mem_kb);

    let mut searcher = Searcher::new(&program);

    searcher.ignore_case(ignore_case);

    if let Some(timeout) = timeout {
        searcher.set_timeout(timeout);
    }

    if let Some(kb) = max_mem_kb {
        searcher.set_max_mem(kb.saturating_mul(1024));
    }

    let all = args.get_flag("all");
    let multiline = args.get_flag("multiline");

    for path in args.get_many::<PathBuf>("FILE").unwrap() {
        let data = fs::read(path)
            .with_context(|| format!("can not read `{}`", path.display()))?;

        let lines = Lines::from_text(data.as_slice());

        let result = if multiline {
            search_multiline(&searcher, path, &lines, all)
        } else {
            search_lines(&searcher, path, &lines, all)
        };

        result
            .with_context(|| format!("can not search `{}`", path.display()))?;
    }

    Ok(())
}

/// Searches each line independently.
fn search_lines(
    searcher: &Searcher,
    path: &Path,
    lines: &Lines,
    all: bool,
) -> anyhow::Result<()> {
    for lnum in 0..lines.line_count() {
        let line = lines.line(lnum);
        let src = SingleLine::new(line);

        let matches = if all {
            searcher.find_all(&src, Position::default())?
        } else {
            searcher.find(&src, Position::default())?.into_iter().collect()
        };

        for m in matches {
            let span = m.span();
            println!(
                "{}:{}:{}:{}",
                path.display().paint(Cyan),
                (lnum + 1).paint(Yellow),
                span.start.col + 1,
                highlight(line, &m),
            );
        }
    }

    Ok(())
}

/// Searches the whole text at once, matches may span multiple lines.
fn search_multiline(
    searcher: &Searcher,
    path: &Path,
    lines: &Lines,
    all: bool,
) -> anyhow::Result<()> {
    let mut last_line = None;

    for m in searcher.find_all(lines, Position::default())? {
        let span = m.span();

        // Without `--all` only the first match that starts in each line
        // is printed.
        if !all && last_line == Some(span.start.line) {
            continue;
        }

        last_line = Some(span.start.line);

        println!(
            "{}:{}:{}-{}:{}:{}",
            path.display().paint(Cyan),
            (span.start.line + 1).paint(Yellow),
            span.start.col + 1,
            (span.end.line + 1).paint(Yellow),
            span.end.col + 1,
            highlight(lines.line(span.start.line), &m),
        );
    }

    Ok(())
}

/// Returns the line where `m` starts, with the matching part highlighted.
/// When the match continues in the next lines, the highlight goes up to the
/// end of the line.
fn highlight(line: &[u8], m: &MatchResult) -> String {
    let span = m.span();
    let start = span.start.col.min(line.len());
    let end = match span.range() {
        Some(range) => range.end.clamp(start, line.len()),
        None => line.len(),
    };
    format!(
        "{}{}{}",
        String::from_utf8_lossy(&line[..start]),
        String::from_utf8_lossy(&line[start..end]).paint(Red).bold(),
        String::from_utf8_lossy(&line[end..]),
    )
}

/// Returns true if the pattern contains an upper-case letter. Letters after
/// a backslash are not taken into account, as in `\S` or `\V`.
fn has_uppercase(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c.is_uppercase() {
            return true;
        }
    }
    false
}
