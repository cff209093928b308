//! Line-based console front end.
//!
//! Script lines accumulate into a fragment until a blank line submits it.
//! Lines starting with `:` are console commands and act immediately.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Pause,
    Resume,
    /// Remove both callbacks and forget every animator.
    Clear,
    /// Discard the scope and start over.
    Reset,
    Load(PathBuf),
    Next,
    History,
    SaveHistory(PathBuf),
    Snapshot(PathBuf),
    Canvas,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  :start              start the frame scheduler
  :stop               stop the frame scheduler
  :pause / :resume    pause or resume ticking
  :clear              unbind each_frame / each_object and drop animators
  :reset              discard all variables and functions
  :load <file>        run the first section of a script file
  :next               run the next section of the loaded file
  :history            print the session transcript
  :save-history <f>   write the history as JSON
  :snapshot <png>     save the canvas as a PNG image
  :canvas             list shapes on the canvas
  :help               show this help
  :quit               exit
Enter script lines; a blank line runs the fragment.
";

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let body = line
            .strip_prefix(':')
            .ok_or_else(|| format!("not a command: {}", line))?;
        let (name, arg) = match body.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (body, ""),
        };

        let path_arg = |command: fn(PathBuf) -> ConsoleCommand| {
            if arg.is_empty() {
                Err(format!(":{} needs a file argument", name))
            } else {
                Ok(command(PathBuf::from(arg)))
            }
        };

        match name {
            "start" => Ok(ConsoleCommand::Start),
            "stop" => Ok(ConsoleCommand::Stop),
            "pause" => Ok(ConsoleCommand::Pause),
            "resume" => Ok(ConsoleCommand::Resume),
            "clear" => Ok(ConsoleCommand::Clear),
            "reset" => Ok(ConsoleCommand::Reset),
            "load" => path_arg(ConsoleCommand::Load),
            "next" => Ok(ConsoleCommand::Next),
            "history" => Ok(ConsoleCommand::History),
            "save-history" => path_arg(ConsoleCommand::SaveHistory),
            "snapshot" => path_arg(ConsoleCommand::Snapshot),
            "canvas" => Ok(ConsoleCommand::Canvas),
            "help" | "h" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "q" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("unknown command :{} (try :help)", other)),
        }
    }
}

/// What a line of input produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInputEvent {
    /// A complete script fragment.
    Fragment(String),
    Command(ConsoleCommand),
    Invalid(String),
    /// Line added to the pending fragment.
    Pending,
}

#[derive(Debug, Default)]
pub struct ConsoleInput {
    buffer: Vec<String>,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> ConsoleInputEvent {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim_start().starts_with(':') && self.buffer.is_empty() {
            return match ConsoleCommand::parse(line) {
                Ok(command) => ConsoleInputEvent::Command(command),
                Err(message) => ConsoleInputEvent::Invalid(message),
            };
        }

        if line.trim().is_empty() {
            return match self.take() {
                Some(fragment) => ConsoleInputEvent::Fragment(fragment),
                None => ConsoleInputEvent::Pending,
            };
        }

        self.buffer.push(line.to_string());
        ConsoleInputEvent::Pending
    }

    /// Flush whatever is pending (end of input).
    pub fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let fragment = self.buffer.join("\n");
        self.buffer.clear();
        Some(fragment)
    }

    pub fn is_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn prompt(&self) -> &'static str {
        if self.is_pending() {
            "...> "
        } else {
            "sketch> "
        }
    }
}
