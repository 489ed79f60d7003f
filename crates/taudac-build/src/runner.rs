use std::io::{BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::runlog::RunLog;

const REAP_POLL: Duration = Duration::from_millis(50);

/// Blocking subprocess execution with line-streamed output. Children run
/// in their own process group so a deadline kill takes the whole subtree
/// (make spawns compilers; git spawns ssh).
pub struct CommandRunner {
    dry_run: bool,
    log: Arc<RunLog>,
}

impl CommandRunner {
    pub fn new(log: Arc<RunLog>, dry_run: bool) -> Self {
        Self { dry_run, log }
    }

    pub fn run(&self, cmd: Command) -> Result<()> {
        self.execute(cmd, None)
    }

    /// Like `run`, but the command must finish within `limit`; on expiry
    /// the process group is killed and the step fails with
    /// `PublishTimeout`.
    pub fn run_with_deadline(&self, cmd: Command, limit: Duration) -> Result<()> {
        self.execute(cmd, Some(limit))
    }

    fn execute(&self, mut cmd: Command, limit: Option<Duration>) -> Result<()> {
        let rendered = render(&cmd);
        if self.dry_run {
            self.log.line(&format!("DRY-RUN: {rendered}"));
            return Ok(());
        }
        self.log.line(&format!("+ {rendered}"));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd
            // Detached stdin: a child in its own process group reading the
            // TTY would stop on SIGTTIN.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Config(format!("failed to start `{rendered}`: {e}")))?;
        let pgid = child.id();

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || stream_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || stream_lines(err, tx));
        }
        drop(tx);

        let deadline = limit.map(|l| Instant::now() + l);
        loop {
            let received = match deadline {
                None => rx.recv().ok(),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(self.kill_on_deadline(&mut child, pgid, &rendered, limit));
                    }
                    match rx.recv_timeout(d - now) {
                        Ok(line) => Some(line),
                        Err(RecvTimeoutError::Timeout) => {
                            return Err(self.kill_on_deadline(&mut child, pgid, &rendered, limit));
                        }
                        Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
            };
            match received {
                Some(line) => self.log.line(&line),
                None => break,
            }
        }

        let status = self.reap(&mut child, pgid, deadline, &rendered, limit)?;
        if !status.success() {
            return Err(Error::PipelineStep {
                command: rendered,
                code: status.code(),
            });
        }
        Ok(())
    }

    // Output streams closed; the child may still be running.
    fn reap(
        &self,
        child: &mut Child,
        pgid: u32,
        deadline: Option<Instant>,
        rendered: &str,
        limit: Option<Duration>,
    ) -> Result<ExitStatus> {
        let Some(d) = deadline else {
            return child.wait().map_err(Error::Io);
        };
        loop {
            if let Some(status) = child.try_wait().map_err(Error::Io)? {
                return Ok(status);
            }
            if Instant::now() >= d {
                return Err(self.kill_on_deadline(child, pgid, rendered, limit));
            }
            std::thread::sleep(REAP_POLL);
        }
    }

    fn kill_on_deadline(
        &self,
        child: &mut Child,
        pgid: u32,
        rendered: &str,
        limit: Option<Duration>,
    ) -> Error {
        let elapsed_secs = limit.map(|l| l.as_secs()).unwrap_or_default();
        self.log
            .line(&format!("TIMEOUT after {elapsed_secs}s: {rendered}"));
        kill_group(pgid, false);
        kill_group(pgid, true);
        let _ = child.wait();
        Error::PublishTimeout {
            command: rendered.to_string(),
            elapsed_secs,
        }
    }
}

fn render(cmd: &Command) -> String {
    let mut out = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        out.push(' ');
        out.push_str(&arg.to_string_lossy());
    }
    out
}

fn kill_group(pgid: u32, force: bool) {
    #[cfg(unix)]
    {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // Negative pid addresses the whole group.
        unsafe {
            libc::kill(-(pgid as i32), sig);
        }
    }
    #[cfg(not(unix))]
    let _ = (pgid, force);
}

// Split on both \n and \r so make-style progress output becomes lines.
fn stream_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const FLUSH_AT: usize = 8192;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(b);
                if pending.len() >= FLUSH_AT {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}
