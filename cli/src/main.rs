mod commands;
mod config;
mod help;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::{io, panic, process};

use anyhow::anyhow;
use crossterm::tty::IsTty;
use yansi::Color::Red;
use yansi::Paint;

use crate::commands::cli;
use crate::config::{load_config_from_file, Config};

const APP_HELP_TEMPLATE: &str = r#"vre {version}, search text with Vim patterns.

{author-with-newline}
{before-help}{usage-heading}
  {usage}

{all-args}{after-help}
"#;

const EXIT_ERROR: i32 = 1;
const CONFIG_FILE: &str = ".vre.toml";

fn main() -> anyhow::Result<()> {
    // Enable support for ANSI escape codes in Windows. In other platforms
    // this is a no-op.
    if let Err(err) = enable_ansi_support::enable_ansi_support() {
        println!("could not enable ANSI support: {}", err)
    }

    #[cfg(feature = "logging")]
    env_logger::init();

    // If stdout is not a tty (for example, because it was redirected to a
    // file) turn off colors. This way you can redirect the output to a file
    // without ANSI escape codes messing up the file content.
    if !io::stdout().is_tty() {
        yansi::disable();
    }

    let args = cli().get_matches_from(wild::args());

    // Set our custom panic hook that kills the process when some panic
    // occurs.
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(EXIT_ERROR);
    }));

    // A config file given in the command line must exist and be valid, the
    // one in the home directory is optional.
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => load_config_from_file(path),
        None => Ok(match home::home_dir() {
            Some(home_path) if !home_path.as_os_str().is_empty() => {
                load_config_from_file(&home_path.join(CONFIG_FILE))
                    .unwrap_or_default()
            }
            _ => Config::default(),
        }),
    };

    let result = match config {
        Ok(config) => {
            if !config.output.color {
                yansi::disable();
            }
            match args.subcommand() {
                Some(("search", args)) => commands::exec_search(args, &config),
                Some(("debug", args)) => commands::exec_debug(args, &config),
                _ => unreachable!(),
            }
        }
        Err(err) => Err(anyhow!("invalid config file: {}", err)),
    };

    if let Err(err) = result {
        if let Some(source) = err.source() {
            eprintln!("{} {}: {}", "error:".paint(Red).bold(), err, source);
        } else {
            eprintln!("{} {}", "error:".paint(Red).bold(), err);
        }
        process::exit(EXIT_ERROR);
    }

    Ok(())
}
