use std::fs;
use std::time::Duration;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::git;
use crate::notify::Notify;
use crate::resolver::PendingBuild;
use crate::targets::BuildTarget;
use crate::version::KernelVersion;

/// Retrieves kernel sources for an upstream commit into the build area.
pub trait SourceFetcher {
    fn fetch(&self, commit: &str) -> Result<()>;
}

/// Builds the driver modules for one kernel flavour.
pub trait ModuleBuilder {
    fn build(&self, version: &KernelVersion, target: &BuildTarget) -> Result<()>;
}

/// Version-control plumbing over the downstream modules working tree.
pub trait VersionControl {
    fn sync_ff(&self) -> Result<()>;
    fn stage_modules(&self) -> Result<()>;
    fn commit(&self, message: &str) -> Result<()>;
    fn tag(&self, name: &str, force: bool) -> Result<()>;
    /// Show the commits that a publish would send upstream.
    fn show_outgoing(&self) -> Result<()>;
    fn push(&self, timeout: Duration) -> Result<()>;
    fn push_tags(&self, timeout: Duration) -> Result<()>;
}

/// Operator confirmation gate.
pub trait Confirm {
    fn confirm(&self, question: &str) -> Result<bool>;
}

pub fn module_tag(version: &KernelVersion) -> String {
    format!("rpi-volumio-{version}-taudac-modules")
}

/// Terminal result of one invocation. Per-version successes were already
/// notified by the time this value exists; `built` records them.
#[derive(Debug)]
pub enum RunOutcome {
    Success { built: Vec<KernelVersion> },
    Failure { error: Error, built: Vec<KernelVersion> },
}

/// Drives the fixed per-version pipeline over the resolved pending list,
/// strictly in order, aborting the whole run on the first failure.
pub struct BuildOrchestrator<'a> {
    pub cfg: &'a RunConfig,
    pub targets: &'a [BuildTarget],
    pub fetcher: &'a dyn SourceFetcher,
    pub builder: &'a dyn ModuleBuilder,
    pub vcs: &'a dyn VersionControl,
    pub confirm: &'a dyn Confirm,
    pub notify: &'a dyn Notify,
}

impl BuildOrchestrator<'_> {
    pub fn run(&self, pending: &[PendingBuild]) -> RunOutcome {
        let mut built = Vec::new();
        match self.run_inner(pending, &mut built) {
            Ok(()) => RunOutcome::Success { built },
            Err(error) => RunOutcome::Failure { error, built },
        }
    }

    fn run_inner(&self, pending: &[PendingBuild], built: &mut Vec<KernelVersion>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        // One upfront gate before anything runs; declining must leave no
        // trace, so even the ff-only sync waits until after it.
        let question = format!(
            "Build modules for {} pending kernel version(s)?",
            pending.len()
        );
        if !self.confirm.confirm(&question)? {
            tracing::info!("run declined by operator; nothing was touched");
            return Ok(());
        }

        self.vcs.sync_ff()?;

        for entry in pending {
            self.build_one(entry)?;
            built.push(entry.version.clone());
        }
        Ok(())
    }

    fn build_one(&self, entry: &PendingBuild) -> Result<()> {
        tracing::info!(version = %entry.version, commit = %entry.commit, "building modules");

        self.fetcher.fetch(&entry.commit)?;
        self.clean_stale_artifacts()?;

        // Every flavour must build before anything is recorded; a partial
        // set of module trees must never be committed.
        for target in self.targets {
            self.builder.build(&entry.version, target)?;
        }

        let message = git::read_tag_message(&self.cfg.modules_dir)?;
        self.vcs.stage_modules()?;
        self.vcs.commit(&message)?;
        if self.cfg.tags {
            self.vcs.tag(&module_tag(&entry.version), true)?;
        }

        self.vcs.show_outgoing()?;
        if self.confirm.confirm("Do you want to publish?")? {
            self.vcs.push(self.cfg.push_timeout)?;
            self.vcs.push_tags(self.cfg.push_timeout)?;
        } else {
            tracing::info!(version = %entry.version, "publish declined; commits stay local");
        }

        self.notify.build_succeeded(&entry.version);
        Ok(())
    }

    fn clean_stale_artifacts(&self) -> Result<()> {
        let lib = self.cfg.modules_dir.join("lib");
        if self.cfg.dry_run {
            tracing::info!("dry-run: would remove {}", lib.display());
            return Ok(());
        }
        if lib.exists() {
            fs::remove_dir_all(&lib)?;
        }
        Ok(())
    }
}
