use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};

const MAX_LINE_CHARS: usize = 4000;

/// Sink for operator-facing pipeline output. Every line goes to stdout;
/// when a log file was requested it is mirrored there so a failure report
/// can attach the full transcript.
pub struct RunLog {
    file: Option<Mutex<File>>,
}

impl RunLog {
    pub fn console_only() -> Self {
        Self { file: None }
    }

    /// The log file is an append-only record of exactly one run; a
    /// pre-existing file at the path is refused rather than clobbered.
    pub fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Error::Config(format!(
                        "log file {} already exists; pick a fresh path",
                        path.display()
                    ))
                } else {
                    Error::Io(e)
                }
            })?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub fn line(&self, raw: &str) {
        let line = scrub_line(raw);
        println!("{line}");
        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
        {
            let _ = writeln!(f, "{line}");
        }
    }
}

/// Strip terminal escape sequences and control characters from subprocess
/// output before it reaches the console or the log file.
pub fn scrub_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut kept = 0usize;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                // CSI: parameters end at a byte in '@'..='~'.
                Some('[') => {
                    for t in chars.by_ref() {
                        if ('@'..='~').contains(&t) {
                            break;
                        }
                    }
                }
                // OSC: terminated by BEL or ESC.
                Some(']') => {
                    for t in chars.by_ref() {
                        if t == '\x07' || t == '\x1b' {
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        if c == '\t' {
            out.push(' ');
            kept += 1;
        } else if !c.is_control() {
            out.push(c);
            kept += 1;
        }
        if kept >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::scrub_line;

    #[test]
    fn strips_color_codes() {
        assert_eq!(scrub_line("ok \x1b[32mgreen\x1b[0m done"), "ok green done");
    }

    #[test]
    fn strips_osc_titles_and_controls() {
        assert_eq!(scrub_line("a\x1b]0;title\x07b\r"), "ab");
    }

    #[test]
    fn replaces_tabs() {
        assert_eq!(scrub_line("CC\tdrivers/taudac.o"), "CC drivers/taudac.o");
    }
}
