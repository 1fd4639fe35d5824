use std::process::ExitCode;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "msgwin", about = "Headless driver for the windowed message list")]
pub struct Cli {
    /// Print machine-readable JSON, one object per line.
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Seed an in-memory chat, open it and run scripted steps against the window.
    Simulate(SimulateArgs),
    /// Print the default config file contents.
    Config,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Messages to seed into the chat.
    #[arg(long, default_value_t = 200)]
    pub messages: usize,

    /// Mark the message at this position unread before opening the chat.
    #[arg(long)]
    pub unread_at: Option<usize>,

    #[arg(long, default_value_t = 600.0)]
    pub viewport_height: f64,

    #[arg(long, default_value_t = 40.0)]
    pub message_height: f64,

    /// Insert day markers between messages from different days.
    #[arg(long)]
    pub day_markers: bool,

    /// Directory holding msgwin_config.json and msgwin.log.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Steps: `scroll:<px>`, `top`, `bottom`, `send:<text>`, `receive:<text>`,
    /// `jump:<position>`, `delete:<position>`.
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Scroll(f64),
    Top,
    Bottom,
    Send(String),
    Receive(String),
    /// Position in the chat, clamped into range.
    Jump(i64),
    Delete(i64),
}

impl FromStr for Step {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, arg) = match s.split_once(':') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (s, None),
        };
        let bad = || CliError::Usage(format!("bad step {s:?}"));
        match (verb, arg) {
            ("top", None) => Ok(Step::Top),
            ("bottom", None) => Ok(Step::Bottom),
            ("scroll", Some(px)) => px.parse().map(Step::Scroll).map_err(|_| bad()),
            ("send", Some(text)) => Ok(Step::Send(text.to_string())),
            ("receive", Some(text)) => Ok(Step::Receive(text.to_string())),
            ("jump", Some(pos)) => pos.parse().map(Step::Jump).map_err(|_| bad()),
            ("delete", Some(pos)) => pos.parse().map(Step::Delete).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Window(String),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Usage(_) => "usage",
            CliError::Window(_) => "window",
        }
    }
}

pub fn render_err(json: bool, e: CliError) -> ExitCode {
    if json {
        let v = serde_json::json!({
            "ok": false,
            "code": e.code(),
            "error": e.to_string(),
        });
        println!("{v}");
    } else {
        eprintln!("error: {e}");
    }
    ExitCode::from(2)
}
