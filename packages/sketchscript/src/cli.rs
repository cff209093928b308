use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::console::{ConsoleInput, ConsoleInputEvent, HELP};
use crate::output::ConsoleOutput;
use crate::raster;
use crate::scheduler::TickSink;
use crate::session::{Session, SessionEvent, TickOutcome};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console bound to a canvas
    Repl {
        /// Script to execute before the first prompt
        #[arg(long)]
        script: Option<PathBuf>,

        /// JSON session config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Canvas width (overrides config)
        #[arg(long)]
        width: Option<f32>,

        /// Canvas height (overrides config)
        #[arg(long)]
        height: Option<f32>,
    },
    /// Run a script headless and render frames to disk
    Render {
        /// Script that sets up the canvas and callbacks
        #[arg(long)]
        script: PathBuf,

        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of ticks to render
        #[arg(long, default_value_t = 90)]
        frames: u32,

        /// JSON session config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Canvas width (overrides config)
        #[arg(long)]
        width: Option<f32>,

        /// Canvas height (overrides config)
        #[arg(long)]
        height: Option<f32>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Repl { script, config, width, height } => {
            let config = load_config(config.as_deref(), width, height)?;
            run_repl(config, script)?;
        }
        Commands::Render { script, out, frames, config, width, height } => {
            let config = load_config(config.as_deref(), width, height)?;
            render_offline(config, &script, &out, frames)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>, width: Option<f32>, height: Option<f32>) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(width) = width {
        config.canvas_width = width;
    }
    if let Some(height) = height {
        config.canvas_height = height;
    }
    config.validate()?;
    Ok(config)
}

fn run_repl(config: SessionConfig, script: Option<PathBuf>) -> Result<()> {
    let (tx, rx) = mpsc::channel();

    let tick_tx = tx.clone();
    let sink: TickSink = Arc::new(move |generation| tick_tx.send(SessionEvent::Tick { generation }).is_ok());

    let mut session = Session::new(config)
        .with_output(Rc::new(ConsoleOutput))
        .with_tick_sink(sink);

    println!("sketchscript {} (:help for commands)", env!("CARGO_PKG_VERSION"));
    if let Some(script) = script {
        tx.send(SessionEvent::ExecuteFile(script))?;
    }

    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || read_console(tx))
        .context("Spawning stdin reader")?;

    session.run(rx)
}

/// Reader thread: turns stdin lines into session events.
fn read_console(tx: mpsc::Sender<SessionEvent>) {
    let mut input = ConsoleInput::new();
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}", input.prompt());
        let _ = std::io::stdout().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                log::error!("Failed to read stdin: {}", err);
                break;
            }
            None => break,
        };

        let event = match input.push_line(&line) {
            ConsoleInputEvent::Fragment(source) => SessionEvent::Execute { source, path: None },
            ConsoleInputEvent::Command(command) => SessionEvent::Command(command),
            ConsoleInputEvent::Invalid(message) => {
                eprintln!("{}\n{}", message, HELP);
                continue;
            }
            ConsoleInputEvent::Pending => continue,
        };
        if tx.send(event).is_err() {
            return;
        }
    }

    // End of input: run whatever is pending, then quit.
    if let Some(source) = input.take() {
        let _ = tx.send(SessionEvent::Execute { source, path: None });
    }
    let _ = tx.send(SessionEvent::Quit);
}

fn render_offline(config: SessionConfig, script: &Path, out_dir: &Path, frames: u32) -> Result<()> {
    let mut session = Session::new(config).with_output(Rc::new(ConsoleOutput));

    let result = session.execute_file(script)?;
    if let Some(err) = result.error {
        anyhow::bail!("Script failed: {}", err);
    }
    session.start();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Creating {}", out_dir.display()))?;

    println!("Rendering {} frames to {:?}...", frames, out_dir);

    for i in 0..frames {
        if let TickOutcome::Failed(diag) = session.tick() {
            anyhow::bail!("Animation stopped at frame {}: {}", i, diag);
        }

        let frame_path = out_dir.join(format!("frame_{:05}.png", i));
        raster::save_png(&*session.canvas().borrow(), &frame_path)?;

        if i % 30 == 0 {
            print!(".");
            std::io::stdout().flush()?;
        }
    }
    println!("\nDone.");

    Ok(())
}
