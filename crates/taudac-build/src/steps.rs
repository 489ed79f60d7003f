use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Result;
use crate::pipeline::{ModuleBuilder, SourceFetcher};
use crate::runner::CommandRunner;
use crate::targets::{ArchClass, BuildTarget};
use crate::version::KernelVersion;

/// Fetches kernel sources by handing the upstream commit hash to the
/// repository's fetch script.
pub struct ScriptFetcher<'a> {
    script: PathBuf,
    runner: &'a CommandRunner,
}

impl<'a> ScriptFetcher<'a> {
    pub fn new(script: &Path, runner: &'a CommandRunner) -> Self {
        Self {
            script: script.to_path_buf(),
            runner,
        }
    }
}

impl SourceFetcher for ScriptFetcher<'_> {
    fn fetch(&self, commit: &str) -> Result<()> {
        let mut cmd = Command::new(&self.script);
        cmd.arg(commit);
        self.runner.run(cmd)
    }
}

/// Invokes the DKMS makefile once per kernel flavour, cross-compiling
/// whenever the host is not the flavour's architecture class.
pub struct MakeBuilder<'a> {
    driver_dir: PathBuf,
    extra_args: Vec<String>,
    host: Option<ArchClass>,
    jobs: usize,
    runner: &'a CommandRunner,
}

impl<'a> MakeBuilder<'a> {
    pub fn new(
        driver_dir: &Path,
        extra_args: Vec<String>,
        host: Option<ArchClass>,
        runner: &'a CommandRunner,
    ) -> Self {
        Self {
            driver_dir: driver_dir.to_path_buf(),
            extra_args,
            host,
            jobs: num_cpus::get().max(1),
            runner,
        }
    }
}

impl ModuleBuilder for MakeBuilder<'_> {
    fn build(&self, version: &KernelVersion, target: &BuildTarget) -> Result<()> {
        let mut cmd = Command::new("make");
        cmd.arg("-C").arg(&self.driver_dir);
        cmd.arg(format!("kernelver={version}{}+", target.suffix));
        cmd.arg("prefix=/tmp");
        cmd.arg(format!("-j{}", self.jobs));
        for arg in &self.extra_args {
            cmd.arg(arg);
        }
        cmd.arg("release");
        if target.needs_cross(self.host) {
            for (key, value) in &target.cross_env {
                cmd.env(key, value);
            }
        }
        self.runner.run(cmd)
    }
}
