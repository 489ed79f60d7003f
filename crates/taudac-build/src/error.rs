use std::io;

use thiserror::Error;

/// Failures that end a build run. Every variant is fatal; the outer
/// boundary in `main` reports it and exits non-zero. Nothing here is
/// retried automatically.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "commit feed rejected the request (rate limited); unauthenticated \
         clients get a small per-minute quota — set GITHUB_TOKEN or pass \
         --token to authenticate"
    )]
    RateLimited,

    #[error("commit feed request failed: {0}")]
    Transport(String),

    #[error(
        "none of the recent commits on the modules repository names a \
         supported kernel version; pass --kernel to set the baseline \
         explicitly"
    )]
    BaselineNotFound,

    #[error(
        "walked {limit} commits back without reaching the supported kernel \
         version; the upstream history does not look monotonic (raise \
         --scan-limit if it really is that far behind)"
    )]
    ScanLimitExceeded { limit: usize },

    #[error("command `{command}` failed ({})", exit_desc(.code))]
    PipelineStep {
        command: String,
        code: Option<i32>,
    },

    #[error("command `{command}` did not finish within {elapsed_secs}s; publish aborted")]
    PublishTimeout {
        command: String,
        elapsed_secs: u64,
    },

    #[error("{0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn exit_desc(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit status {c}"),
        None => "killed by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
