//! Command line definition

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgMatches, Command};
use posecoach::analysis::Exercise;

pub enum Action {
    Live {
        exercise: Option<Exercise>,
        device: Option<String>,
    },
    Analyze {
        video: PathBuf,
        exercise: Option<Exercise>,
        out: Option<PathBuf>,
    },
    Health,
    Exercises,
}

pub struct Cli {
    pub config: Option<PathBuf>,
    pub action: Action,
}

fn exercise_arg() -> Arg {
    Arg::new("exercise")
        .short('e')
        .long("exercise")
        .value_name("EXERCISE")
        .help("Exercise to analyze (pushup, squat, plank).")
        .value_parser(|s: &str| s.parse::<Exercise>().map_err(|e| e.to_string()))
}

pub fn command() -> Command {
    Command::new("posecoach")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time exercise form feedback from a vision analysis service")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML config file layered over the defaults.")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("live")
                .about("Stream camera frames and show live feedback")
                .arg(exercise_arg())
                .arg(
                    Arg::new("device")
                        .short('d')
                        .long("device")
                        .value_name("PATH")
                        .help("Camera device, e.g. /dev/video0. Auto-detected when omitted."),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Upload a recorded video and save the annotated result")
                .arg(
                    Arg::new("video")
                        .value_name("VIDEO")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(exercise_arg())
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("FILE")
                        .help("Where to write the annotated video.")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(Command::new("health").about("Check that the vision service is up"))
        .subcommand(Command::new("exercises").about("List exercises the service supports"))
}

impl Cli {
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let config = matches.get_one::<PathBuf>("config").cloned();
        let action = match matches.subcommand() {
            Some(("live", sub)) => Action::Live {
                exercise: sub.get_one::<Exercise>("exercise").copied(),
                device: sub.get_one::<String>("device").cloned(),
            },
            Some(("analyze", sub)) => Action::Analyze {
                video: sub
                    .get_one::<PathBuf>("video")
                    .cloned()
                    .unwrap_or_default(),
                exercise: sub.get_one::<Exercise>("exercise").copied(),
                out: sub.get_one::<PathBuf>("out").cloned(),
            },
            Some(("exercises", _)) => Action::Exercises,
            _ => Action::Health,
        };
        Self { config, action }
    }
}
