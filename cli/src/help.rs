pub const CONFIG_FILE: &str = r#"Config file for vre

Specifies a config file which controls the behavior of vre. If config file is not
specified, ${HOME}/.vre.toml is used. If it does not exist the default options are
applied.

Example:

[search]
magic = "all"
ignore_case = true
smart_case = true
timeout_ms = 5000
max_mem_kb = 2000

[output]
color = false"#;

pub const SEARCH_LONG_HELP: &str = r#"Search for a pattern in one or more files

Each file is searched line by line, and every line that contains a match is printed
as PATH:LINE:COLUMN:TEXT, where LINE and COLUMN start at 1 and COLUMN is a byte
offset. Only the first match in each line is printed, unless `--all` is used."#;

pub const MAGIC_LONG_HELP: &str = r#"Magic level at the start of the pattern

The level determines which characters have a special meaning without a backslash:

none  only `\` is special, like starting the pattern with `\V`
off   only `^` and `$` are special, like `\M`
on    `^ $ . * [ ~` are special, like `\m`. This is the default.
all   all punctuation characters are special, like `\v`"#;

pub const MULTILINE_LONG_HELP: &str = r#"Search the whole file as a multi-line text

In this mode `\n` matches line breaks, `\%l` matches line numbers, and matches can
span multiple lines. Each match is printed as PATH:LINE:COLUMN-LINE:COLUMN:TEXT,
where the second position is the one right after the match, and TEXT is the first
line of the match."#;

pub const DEBUG_LONG_HELP: &str = r#"Print the compiled program for a pattern

The program is printed one node per line, each node starts with its address. The
optimization hints computed for the pattern are printed after the program."#;
