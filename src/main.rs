use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

use clap::{Parser, Subcommand};

use picokernel::config::Config;
use picokernel::device::DeviceLocator;
use picokernel::reply::{ExecuteReply, KernelInfo, StreamChunk};
use picokernel::session::Session;
use picokernel::{pklog, util, Result};

/// Picokernel - build, flash and run C code on a Raspberry Pi Pico
#[derive(Parser, Debug)]
#[command(name = "picokernel")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    PICOKERNEL_DEBUG=1     Enable debug logging (alternative to --debug)\n    PICOKERNEL_LOG=trace   Pick the log level explicitly"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.picokernel/picokernel.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute one submission: write, build, flash, then stream device output
    Run {
        /// Source file to submit (reads stdin if omitted)
        file: Option<PathBuf>,

        /// Working directory holding the scripts and the entry file
        #[arg(long, short = 'w')]
        workdir: Option<PathBuf>,

        /// Print stream chunks and the final reply as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List serial ports and mark the ones that look like a Pico
    Ports,

    /// Print kernel info as JSON
    Info,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    picokernel::log::init(cli.debug);

    match cli.command {
        Command::Run {
            file,
            workdir,
            json,
        } => {
            if !run_submission(file, workdir, json)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Ports => run_ports(),
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&KernelInfo::default())?);
            Ok(())
        }
        Command::Config { init } => run_config(init),
    }
}

/// Execute one submission. Returns whether it succeeded.
fn run_submission(file: Option<PathBuf>, workdir: Option<PathBuf>, json: bool) -> Result<bool> {
    let code = match &file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    pklog!(
        "Run command: file={:?}, workdir={}, json={}",
        file,
        workdir.display(),
        json
    );

    let config = Config::load()?;
    let mut session = Session::new(&config, &workdir);
    let cancel = session.cancel_token();

    let (tx, rx) = crossbeam_channel::unbounded::<StreamChunk>();
    let printer = thread::spawn(move || {
        let stdout = io::stdout();
        for chunk in rx {
            let mut out = stdout.lock();
            if json {
                if let Ok(line) = serde_json::to_string(&chunk) {
                    let _ = writeln!(out, "{}", line);
                }
            } else {
                let _ = write!(out, "{}", chunk.text);
            }
            let _ = out.flush();
        }
    });

    let rt = tokio::runtime::Runtime::new()?;
    let (result, execution_count) = rt.block_on(async move {
        let listener = tokio::spawn(util::cancel_on_ctrl_c(cancel));
        let outcome = util::blocking(move || {
            let mut sink = tx;
            let result = session.execute(&code, &mut sink);
            (result, session.execution_count())
        })
        .await;
        listener.abort();
        outcome
    })?;
    let _ = printer.join();

    let reply = ExecuteReply::from_result(&result, execution_count);
    if json {
        println!("{}", serde_json::to_string(&reply)?);
    } else if result.is_success() {
        let message = result.message();
        if !message.is_empty() {
            println!("{}", message);
        }
    } else {
        eprintln!("error: {}", result.message());
    }
    Ok(reply.is_ok())
}

fn run_ports() -> Result<()> {
    let ports = DeviceLocator::system().list()?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for (port, is_pico) in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "----:----".to_string(),
        };
        println!(
            "{} {:<24} {}  {}",
            if is_pico { "*" } else { " " },
            port.name,
            ids,
            port.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    let resolved = Config::load()?.resolved();
    if init {
        let path = resolved.save()?;
        println!("Wrote {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&resolved)?);
    Ok(())
}
