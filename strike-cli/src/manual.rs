//! Manual console: one command per stdin line

use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;

use anyhow::{Result, bail};
use colored::*;
use tokio::sync::mpsc;
use tracing::debug;

use crate::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCommand {
    /// Trigger a channel by number
    Channel(u16),
    ToggleSequence,
    Calibrate,
    Stats,
    Help,
    Quit,
}

impl FromStr for ManualCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return match s.parse() {
                Ok(channel) => Ok(ManualCommand::Channel(channel)),
                Err(_) => bail!("channel number too large: {}", s),
            };
        }
        match s.to_ascii_lowercase().as_str() {
            "t" | "toggle" => Ok(ManualCommand::ToggleSequence),
            "c" | "calibrate" => Ok(ManualCommand::Calibrate),
            "s" | "stats" => Ok(ManualCommand::Stats),
            "h" | "help" | "?" => Ok(ManualCommand::Help),
            "q" | "quit" | "exit" => Ok(ManualCommand::Quit),
            "" => bail!("empty command"),
            other => bail!("unknown command '{}' (h for help)", other),
        }
    }
}

pub fn print_help() {
    println!("{}", "Manual input".bold());
    println!("  {}  trigger a channel", "<n>".cyan());
    println!("  {}    toggle normal / alternate sequence", "t".cyan());
    println!("  {}    calibrate every channel", "c".cyan());
    println!("  {}    show statistics", "s".cyan());
    println!("  {}    quit", "q".cyan());
}

/// Reads stdin on a dedicated thread, bridged into the runtime. The thread
/// ends at EOF or once the receiver is dropped.
pub fn spawn_reader(tx: mpsc::Sender<Input>) -> io::Result<()> {
    thread::Builder::new()
        .name("manual-input".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ManualCommand>() {
                    Ok(command) => {
                        if tx.blocking_send(Input::Command(command)).is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{} {}", "error:".red().bold(), err),
                }
            }
            debug!("manual input closed");
        })?;
    Ok(())
}
