//! Output rendering for the chat REPL.
//!
//! The [`Renderer`] trait is what a streamed answer is written to.  The
//! default implementation prints to stdout with optional ANSI styling.

use std::io::{self, Stdout, Write};

use crate::types::{Message, Role, Session};

/// ANSI escape code for dim text (used for informational output).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user's turns).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the active marker).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a chunk of answer text.
    ///
    /// This is called incrementally as tokens are streamed from the backend.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a complete message from the history.
    fn print_message(&mut self, message: &Message) {
        self.print_info(&format!("[{}] {}", message.role, message.content));
    }

    /// Print one row of the session list.
    fn print_session(&mut self, session: &Session, active: bool) {
        let marker = if active { "*" } else { " " };
        self.print_info(&format!(
            "{marker} {}  {}  ({})",
            session.id,
            session.display_title(),
            session.model_alias
        ));
    }

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("\n{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("\nError: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
    }

    fn print_message(&mut self, message: &Message) {
        match (message.role, self.use_color) {
            (Role::User, true) => println!("{ANSI_CYAN}> {}{ANSI_RESET}", message.content),
            (Role::User, false) => println!("> {}", message.content),
            (Role::Assistant, _) => println!("{}", message.content),
            (role, _) => println!("[{role}] {}", message.content),
        }
    }

    fn print_session(&mut self, session: &Session, active: bool) {
        let marker = match (active, self.use_color) {
            (true, true) => format!("{ANSI_GREEN}*{ANSI_RESET}"),
            (true, false) => "*".to_string(),
            (false, _) => " ".to_string(),
        };
        let rag = if session.use_rag { " +rag" } else { "" };
        println!(
            "{marker} {}  {}  ({}{rag})",
            session.id,
            session.display_title(),
            session.model_alias
        );
    }

    fn finish_response(&mut self) {
        println!();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        println!("\n[interrupted]");
        self.flush();
    }
}
