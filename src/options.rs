//! Parsing Options.
//! `irrigate [--config FILE] [--zones N] <export|marking|simulate|controller>`
//!
//! Flags in `IRRIGATE_FLAGS` are split with shell rules and placed before the
//! command-line arguments, so they can only carry the global flags.

use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand, value_parser};
use std::error::Error;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Ron,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command {
    /// Write the PNML document of the irrigation net (or of the controller net).
    Export {
        output: Option<PathBuf>,
        controller: bool,
    },
    Marking {
        format: OutputFormat,
    },
    /// Start every pump and run the timed cascade for `duration` time units.
    Simulate {
        duration: u64,
        time_unit_ms: Option<u64>,
        auto_mode: bool,
    },
    Controller {
        transitions: Vec<String>,
        steps: Option<usize>,
    },
}

fn make_options_parser() -> ClapCommand {
    ClapCommand::new("irrigate")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Irrigation controller Petri net")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("zones")
                .short('z')
                .long("zones")
                .value_parser(value_parser!(usize))
                .help("Number of irrigation zones, overrides the configuration"),
        )
        .subcommand(
            ClapCommand::new("export")
                .about("Export the net as PNML")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the document to FILE instead of stdout"),
                )
                .arg(
                    Arg::new("controller")
                        .long("controller")
                        .action(ArgAction::SetTrue)
                        .help("Export the two-zone controller net"),
                ),
        )
        .subcommand(
            ClapCommand::new("marking")
                .about("Print the initial marking")
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .default_value("json")
                        .value_parser(["json", "ron"]),
                ),
        )
        .subcommand(
            ClapCommand::new("simulate")
                .about("Start all pumps and print engine events")
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .default_value("25")
                        .value_parser(value_parser!(u64))
                        .help("Simulated time units"),
                )
                .arg(
                    Arg::new("time-unit-ms")
                        .long("time-unit-ms")
                        .value_parser(value_parser!(u64))
                        .help("Length of a time unit, overrides the configuration"),
                )
                .arg(
                    Arg::new("auto")
                        .long("auto")
                        .action(ArgAction::SetTrue)
                        .help("Fire all enabled transitions every auto period"),
                ),
        )
        .subcommand(
            ClapCommand::new("controller")
                .about("Apply domain transitions to the two-zone controller")
                .arg(
                    Arg::new("transitions")
                        .value_name("TRANSITION")
                        .num_args(0..)
                        .help("e.g. start_pump irrigate_zone1 to_rest"),
                )
                .arg(
                    Arg::new("steps")
                        .short('s')
                        .long("steps")
                        .value_parser(value_parser!(usize))
                        .conflicts_with("transitions")
                        .help("Apply the next step N times"),
                ),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub zones: Option<usize>,
    pub command: Command,
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    /// Parses `IRRIGATE_FLAGS`-style `env_flags` followed by `args`.
    pub fn parse_with_env(env_flags: &str, args: &[String]) -> Result<Self, Box<dyn Error>> {
        let mut flags = shellwords::split(env_flags)?;
        flags.extend_from_slice(args);
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let config = matches.get_one::<PathBuf>("config").cloned();
        let zones = matches.get_one::<usize>("zones").copied();
        let command = match matches.subcommand() {
            Some(("export", sub)) => Command::Export {
                output: sub.get_one::<PathBuf>("output").cloned(),
                controller: sub.get_flag("controller"),
            },
            Some(("marking", sub)) => Command::Marking {
                format: parse_format(sub)?,
            },
            Some(("simulate", sub)) => Command::Simulate {
                duration: sub.get_one::<u64>("duration").copied().unwrap_or(25),
                time_unit_ms: sub.get_one::<u64>("time-unit-ms").copied(),
                auto_mode: sub.get_flag("auto"),
            },
            Some(("controller", sub)) => Command::Controller {
                transitions: sub
                    .get_many::<String>("transitions")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
                steps: sub.get_one::<usize>("steps").copied(),
            },
            _ => return Err("UnsupportedCommand")?,
        };

        if zones == Some(0) {
            return Err("zones must be at least 1")?;
        }

        Ok(Options {
            config,
            zones,
            command,
        })
    }
}

fn parse_format(matches: &ArgMatches) -> Result<OutputFormat, Box<dyn Error>> {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("json") | None => Ok(OutputFormat::Json),
        Some("ron") => Ok(OutputFormat::Ron),
        Some(other) => Err(format!("unsupported format `{other}`").into()),
    }
}
