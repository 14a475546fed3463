use std::{fmt::Display, str::FromStr};

use clap::Parser;
use tracing_subscriber::filter::{self, Directive};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(flatten)]
    pub args: Args,
}

#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    /// Base URL of the issue management server.
    #[clap(long, short, env = "TRIAGE_SERVER", default_value = "http://localhost:8000")]
    pub server: String,
    /// CORS relay that proxies profile lookups.
    #[clap(long, env = "TRIAGE_RELAY", default_value = "https://corsproxy.io/")]
    pub relay: String,
    /// Host of the profile service, without scheme. Required.
    #[clap(long, env = "TRIAGE_PROFILE_HOST", required_unless_present = "print_log_dir")]
    pub profile_host: Option<String>,
    /// Rows left below the message pane before the next page is requested.
    #[clap(long, env = "TRIAGE_SCROLL_THRESHOLD", default_value_t = 10)]
    pub scroll_threshold: usize,
    #[clap(long, short, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    #[clap(long, short)]
    pub print_log_dir: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    None,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::None => "none",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<LogLevel> for Directive {
    type Error = filter::ParseError;
    fn try_from(value: LogLevel) -> Result<Self, Self::Error> {
        match value {
            LogLevel::None => Directive::from_str("off"),
            level => Directive::from_str(&level.to_string()),
        }
    }
}
