//! Output collaborator for script prints, results and errors.
//!
//! Script `print`/`debug` calls are routed here once the runner redirects
//! output. A per-tick budget keeps a print inside a 30 Hz callback from
//! flooding the console.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;

/// Append-only text sink. Implementations must make the text visible.
pub trait Output {
    fn write(&self, text: &str);
}

pub type SharedOutput = Rc<dyn Output>;

/// Writes to stdout and flushes, so partial lines show up immediately.
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl Output for ConsoleOutput {
    fn write(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects output in memory.
#[derive(Debug, Default)]
pub struct BufferOutput {
    buffer: RefCell<String>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.borrow_mut())
    }
}

impl Output for BufferOutput {
    fn write(&self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}

/// Per-tick print budget.
#[derive(Debug)]
pub struct PrintGate {
    limit: u32,
    count: Cell<u32>,
    warned: Cell<bool>,
}

impl PrintGate {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: Cell::new(0),
            warned: Cell::new(false),
        }
    }

    /// Reset the budget. Call at the start of each tick and each execution.
    pub fn reset(&self) {
        self.count.set(0);
        self.warned.set(false);
    }

    /// Check whether another print fits in the budget.
    /// Returns the warning to emit instead when the budget was just exhausted.
    pub fn admit(&self) -> Result<(), Option<String>> {
        let count = self.count.get();
        self.count.set(count.saturating_add(1));
        if count < self.limit {
            return Ok(());
        }
        if self.warned.replace(true) {
            Err(None)
        } else {
            Err(Some(format!(
                "[warn] print limit exceeded ({} per tick). Further output dropped.\n",
                self.limit
            )))
        }
    }
}
