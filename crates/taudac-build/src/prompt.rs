use std::io::{self, BufRead, Write};

use crate::error::Result;
use crate::pipeline::Confirm;

/// Interactive yes/no prompt on the controlling terminal. `--yes` and a
/// closed stdin (non-interactive invocation) both auto-affirm.
pub struct ConsolePrompt {
    assume_yes: bool,
}

impl ConsolePrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Confirm for ConsolePrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        if self.assume_yes {
            println!("{question} [auto-yes]");
            return Ok(true);
        }
        let stdin = io::stdin();
        loop {
            print!("{question} [Y/n] ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                println!();
                return Ok(true);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" | "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please answer 'yes' or 'no'."),
            }
        }
    }
}
