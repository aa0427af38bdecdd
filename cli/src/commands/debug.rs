use clap::{arg, ArgMatches, Command};
use yansi::Color::Green;
use yansi::Paint;

use crate::config::Config;
use crate::help;

pub fn debug() -> Command {
    super::command("debug")
        .about("Print the compiled program for a pattern")
        .long_about(help::DEBUG_LONG_HELP)
        .arg(arg!(<PATTERN>).help("Pattern to compile"))
        .arg(super::magic_arg())
}

pub fn exec_debug(args: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let program = super::compile_pattern(args, config.search.magic)?;

    // The disassembly starts with an empty line.
    print!("{}", program.to_string().trim_start());
    println!();

    println!("{}: {}", "anchored".paint(Green), program.anchored());

    match program.start_char() {
        Some(c) => println!("{}: {:?}", "start char".paint(Green), c),
        None => println!("{}: none", "start char".paint(Green)),
    }

    match program.must_literal() {
        Some(literal) => println!(
            "{}: {:?}",
            "must literal".paint(Green),
            String::from_utf8_lossy(literal)
        ),
        None => println!("{}: none", "must literal".paint(Green)),
    }

    println!("{}: {}", "capture groups".paint(Green), program.capture_count());

    Ok(())
}
