mod debug;
mod search;

pub use debug::*;
pub use search::*;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{arg, command, crate_authors, value_parser, ArgMatches, Command};
use vimre::{CompileOptions, MagicLevel, Program};

use crate::config::Magic;
use crate::{commands, help, APP_HELP_TEMPLATE};

pub fn command(name: &'static str) -> Command {
    Command::new(name).help_template(
        r#"{about-with-newline}
{usage-heading}
  {usage}

{all-args}
"#,
    )
}

pub fn cli() -> Command {
    command!()
        .author(crate_authors!("\n")) // requires `cargo` feature
        .arg_required_else_help(true)
        .arg(
            arg!(-C --config <CONFIG_FILE> "Config file")
                .value_parser(existing_path_parser)
                .long_help(help::CONFIG_FILE),
        )
        .help_template(APP_HELP_TEMPLATE)
        .subcommand_required(true)
        .subcommands(vec![commands::search(), commands::debug()])
}

/// The `--magic` option, shared by all the commands that compile a
/// pattern.
fn magic_arg() -> clap::Arg {
    arg!(-m --magic <LEVEL>)
        .help("Magic level at the start of the pattern")
        .long_help(help::MAGIC_LONG_HELP)
        .value_parser(value_parser!(Magic))
}

/// Compiles the pattern in the `PATTERN` argument, with the magic level
/// given in the command line or, if not given, the one in the config file.
fn compile_pattern(
    args: &ArgMatches,
    default_magic: Magic,
) -> Result<Program, anyhow::Error> {
    let pattern = args.get_one::<String>("PATTERN").unwrap();
    let magic = args.get_one::<Magic>("magic").copied().unwrap_or(default_magic);

    let options = CompileOptions::new().magic(MagicLevel::from(magic));

    vimre::compile(pattern, &options)
        .with_context(|| format!("invalid pattern `{}`", pattern))
}

/// Parses a path and makes sure that it exists.
fn existing_path_parser(input: &str) -> Result<PathBuf, anyhow::Error> {
    let path = PathBuf::from(input);
    if path.try_exists()? {
        Ok(path)
    } else {
        Err(anyhow!("file not found"))
    }
}
