use std::fs;
use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::EmailConfig;
use crate::error::{Error, Result};
use crate::version::KernelVersion;

/// Terminal-outcome reporting. The console path always runs; a delivery
/// problem in an additional channel is logged and never replaces or masks
/// the original build error.
pub trait Notify {
    fn build_succeeded(&self, version: &KernelVersion);
    fn run_failed(&self, error: &Error);
}

pub struct ConsoleNotifier;

impl Notify for ConsoleNotifier {
    fn build_succeeded(&self, version: &KernelVersion) {
        println!("Successfully built modules for kernel {version}");
    }

    fn run_failed(&self, error: &Error) {
        eprintln!("Build run failed: {error}");
    }
}

/// Emails each outcome to the operator, attaching the run log to failure
/// reports when one was written.
pub struct EmailNotifier {
    cfg: EmailConfig,
    log_file: Option<PathBuf>,
}

impl EmailNotifier {
    pub fn new(cfg: EmailConfig, log_file: Option<PathBuf>) -> Self {
        Self { cfg, log_file }
    }

    fn send(&self, subject: &str, body: &str, attach_log: bool) -> Result<()> {
        let from: Mailbox = self
            .cfg
            .from
            .parse()
            .map_err(|e| Error::Config(format!("invalid sender address '{}': {e}", self.cfg.from)))?;
        let to: Mailbox = self
            .cfg
            .to
            .parse()
            .map_err(|e| Error::Config(format!("invalid recipient address '{}': {e}", self.cfg.to)))?;

        let builder = Message::builder().from(from).to(to).subject(subject);
        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string());

        let log_attachment = if attach_log {
            self.read_log()
        } else {
            None
        };
        let message = match log_attachment {
            Some((name, content)) => builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(text)
                        .singlepart(Attachment::new(name).body(content, ContentType::TEXT_PLAIN)),
                )
                .map_err(|e| Error::Config(format!("failed to assemble mail: {e}")))?,
            None => builder
                .singlepart(text)
                .map_err(|e| Error::Config(format!("failed to assemble mail: {e}")))?,
        };

        let mailer = SmtpTransport::starttls_relay(&self.cfg.host)
            .map_err(|e| Error::Config(format!("smtp relay {}: {e}", self.cfg.host)))?
            .port(self.cfg.port)
            .credentials(Credentials::new(
                self.cfg.user.clone(),
                self.cfg.password.clone(),
            ))
            .build();
        mailer
            .send(&message)
            .map_err(|e| Error::Config(format!("smtp send failed: {e}")))?;
        Ok(())
    }

    fn read_log(&self) -> Option<(String, String)> {
        let path = self.log_file.as_ref()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "build.log".to_string());
        match fs::read_to_string(path) {
            Ok(content) => Some((name, content)),
            Err(e) => {
                tracing::warn!("cannot attach run log {}: {e}", path.display());
                None
            }
        }
    }
}

impl Notify for EmailNotifier {
    fn build_succeeded(&self, version: &KernelVersion) {
        println!("Successfully built modules for kernel {version}");
        let subject = format!("taudac modules built for kernel {version}");
        let body = format!(
            "Modules for kernel {version} were built, committed and tagged \
             in the downstream repository.\n"
        );
        if let Err(e) = self.send(&subject, &body, false) {
            tracing::error!("success notification not delivered: {e}");
        }
    }

    fn run_failed(&self, error: &Error) {
        eprintln!("Build run failed: {error}");
        let body = format!(
            "The module build run failed:\n\n{error}\n\nPartial build \
             output is left in the working tree for inspection.\n"
        );
        if let Err(e) = self.send("taudac modules build FAILED", &body, true) {
            tracing::error!("failure notification not delivered: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_attachment_is_skipped_when_no_file_was_written() {
        let notifier = EmailNotifier::new(
            EmailConfig {
                to: "ops@example.org".into(),
                from: "builder@example.org".into(),
                host: "smtp.example.org".into(),
                port: 587,
                user: "builder".into(),
                password: "secret".into(),
            },
            None,
        );
        assert!(notifier.read_log().is_none());
    }

    #[test]
    fn log_attachment_carries_the_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "make: ok\n").unwrap();

        let notifier = EmailNotifier::new(
            EmailConfig {
                to: "ops@example.org".into(),
                from: "builder@example.org".into(),
                host: "smtp.example.org".into(),
                port: 587,
                user: "builder".into(),
                password: "secret".into(),
            },
            Some(path),
        );
        let (name, content) = notifier.read_log().expect("log present");
        assert_eq!(name, "run.log");
        assert_eq!(content, "make: ok\n");
    }
}
