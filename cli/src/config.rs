use std::path::Path;

use clap::ValueEnum;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use vimre::MagicLevel;

/// Configuration for the CLI.
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configuration for the `search` command.
    pub search: SearchConfig,
    /// Configuration for the output of all commands.
    pub output: OutputConfig,
}

/// Magic level, as written in the config file and the command line.
#[derive(
    Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Magic {
    /// Only `\` is special (like `\V`).
    None,
    /// Only `^` and `$` are special (like `\M`).
    Off,
    /// `^ $ . * [ ~` are special (like `\m`).
    #[default]
    On,
    /// All punctuation characters are special (like `\v`).
    All,
}

impl From<Magic> for MagicLevel {
    fn from(magic: Magic) -> Self {
        match magic {
            Magic::None => MagicLevel::None,
            Magic::Off => MagicLevel::Off,
            Magic::On => MagicLevel::On,
            Magic::All => MagicLevel::All,
        }
    }
}

/// Configuration for the `search` command.
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Magic level at the start of every pattern.
    pub magic: Magic,
    /// Ignore case when matching.
    pub ignore_case: bool,
    /// With `ignore_case`, don't ignore case if the pattern contains
    /// upper-case characters.
    pub smart_case: bool,
    /// Timeout for each search, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Memory limit for the backtracking state, in KiB.
    pub max_mem_kb: Option<usize>,
}

/// Configuration for the output.
#[derive(Deserialize, Serialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Highlight matches and errors when the output is a terminal.
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

/// Load the config file from a given path. Path must contain a valid TOML
/// file or this function will return an error. Fields that are not set in
/// the file keep their default values.
pub fn load_config_from_file(
    config_file: &Path,
) -> Result<Config, Box<figment::Error>> {
    let config: Config =
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file_exact(config_file))
            .extract()?;
    Ok(config)
}
