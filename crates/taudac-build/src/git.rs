use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pipeline::VersionControl;
use crate::runner::CommandRunner;

/// Repository-local marker file whose content supplies the artifact commit
/// message. Written by the release tooling, only ever read here.
pub const TAG_MESSAGE_FILE: &str = ".git/taudac_git_tag";

/// `VersionControl` over the git CLI, scoped to the modules working tree
/// with `git -C`.
pub struct GitCli<'a> {
    dir: PathBuf,
    runner: &'a CommandRunner,
}

impl<'a> GitCli<'a> {
    pub fn new(dir: &Path, runner: &'a CommandRunner) -> Self {
        Self {
            dir: dir.to_path_buf(),
            runner,
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.dir);
        cmd
    }
}

impl VersionControl for GitCli<'_> {
    fn sync_ff(&self) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["pull", "--ff-only"]);
        self.runner.run(cmd).inspect_err(|_| {
            tracing::error!(
                "fast-forward pull failed; the modules checkout has diverged \
                 and needs manual attention"
            );
        })
    }

    fn stage_modules(&self) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["add", "lib/"]);
        self.runner.run(cmd)
    }

    fn commit(&self, message: &str) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["commit", "-m", message]);
        self.runner.run(cmd)
    }

    fn tag(&self, name: &str, force: bool) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("tag");
        if force {
            cmd.arg("-f");
        }
        cmd.arg(name);
        self.runner.run(cmd)
    }

    fn show_outgoing(&self) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["log", "--oneline", "--decorate", "origin/master.."]);
        self.runner.run(cmd)
    }

    fn push(&self, timeout: Duration) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("push");
        self.runner.run_with_deadline(cmd, timeout)
    }

    fn push_tags(&self, timeout: Duration) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["push", "--tags"]);
        self.runner.run_with_deadline(cmd, timeout)
    }
}

/// Read the commit message from the marker file: one leading comment
/// character is stripped, trailing whitespace dropped.
pub fn read_tag_message(modules_dir: &Path) -> Result<String> {
    let path = modules_dir.join(TAG_MESSAGE_FILE);
    let raw = fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!(
            "failed to read commit message marker {}: {e}",
            path.display()
        ))
    })?;
    let message = raw.strip_prefix('#').unwrap_or(&raw).trim_end();
    if message.is_empty() {
        return Err(Error::Config(format!(
            "commit message marker {} is empty",
            path.display()
        )));
    }
    Ok(message.to_string())
}
