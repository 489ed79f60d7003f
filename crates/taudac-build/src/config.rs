use std::path::PathBuf;
use std::time::Duration;

use crate::version::KernelVersion;

/// Cross-cutting settings for one run, threaded explicitly instead of
/// living in process-global state.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub assume_yes: bool,
    pub dry_run: bool,
    /// Downstream working tree receiving the built modules.
    pub modules_dir: PathBuf,
    /// TauDAC driver source directory handed to `make -C`.
    pub driver_dir: PathBuf,
    /// Script that fetches kernel sources for an upstream commit.
    pub fetch_script: PathBuf,
    pub log_file: Option<PathBuf>,
    pub max_versions: Option<usize>,
    pub baseline_override: Option<KernelVersion>,
    /// Extra make arguments forwarded verbatim.
    pub make_args: Vec<String>,
    /// Tag each release commit (disabled by --no-tags).
    pub tags: bool,
    /// Upper bound on the backward walk over upstream history.
    pub scan_limit: usize,
    pub push_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            assume_yes: false,
            dry_run: false,
            modules_dir: PathBuf::from("../modules"),
            driver_dir: PathBuf::from("../taudac-driver-dkms/src"),
            fetch_script: PathBuf::from("./get-rpi-kernel-sources.sh"),
            log_file: None,
            max_versions: None,
            baseline_override: None,
            make_args: Vec::new(),
            tags: true,
            scan_limit: 200,
            push_timeout: Duration::from_secs(60),
        }
    }
}

/// SMTP delivery settings; present only when the operator selected the
/// `email` subcommand.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub to: String,
    pub from: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}
