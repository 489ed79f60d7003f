use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::feed::CommitRecord;
use crate::version::KernelVersion;

/// How many of the newest downstream commits are inspected for the
/// baseline release message.
pub const BASELINE_WINDOW: usize = 2;

/// One kernel version that still needs a module build, keyed by the
/// upstream commit that announced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBuild {
    pub commit: String,
    pub version: KernelVersion,
}

fn baseline_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^taudac-.* for ([0-9]+(?:\.[0-9]+)*)").expect("baseline pattern compiles")
    })
}

fn bump_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^kernel:?\s+(?i:bump|update)\s+to\s+([0-9]+(?:\.[0-9]+)*)")
            .expect("bump pattern compiles")
    })
}

/// Commit-message matching is a parsing boundary: a message that does not
/// announce a kernel bump yields `None` and the commit is skipped.
pub fn match_bump(summary: &str) -> Option<KernelVersion> {
    let caps = bump_pattern().captures(summary)?;
    caps[1].parse().ok()
}

/// The newest kernel version the modules repository already supports.
/// An operator override wins; otherwise the release message of one of the
/// `BASELINE_WINDOW` newest downstream commits must name it. No match is
/// fatal — inferring a baseline would risk rebuilding published versions.
pub fn baseline(
    override_version: Option<&KernelVersion>,
    recent: &[CommitRecord],
) -> Result<KernelVersion> {
    if let Some(v) = override_version {
        tracing::info!(version = %v, "using operator-supplied baseline");
        return Ok(v.clone());
    }
    for commit in recent.iter().take(BASELINE_WINDOW) {
        if let Some(caps) = baseline_pattern().captures(&commit.summary)
            && let Ok(v) = caps[1].parse::<KernelVersion>()
        {
            return Ok(v);
        }
    }
    Err(Error::BaselineNotFound)
}

/// Walk the upstream feed backward and collect every announced kernel
/// version newer than the baseline.
///
/// The history is assumed monotonically decreasing in version going
/// backward, so the first announcement at or below the baseline ends the
/// walk. A version already collected is a duplicate announcement: skipped,
/// but the walk continues. Discovery order is newest-first; the result is
/// sorted ascending so builds land oldest-first, and only then truncated
/// to the oldest `max_versions` entries.
pub fn pending<I>(
    upstream: I,
    baseline: &KernelVersion,
    max_versions: Option<usize>,
) -> Result<Vec<PendingBuild>>
where
    I: IntoIterator<Item = Result<CommitRecord>>,
{
    let mut out: Vec<PendingBuild> = Vec::new();

    for item in upstream {
        let commit = item?;
        let Some(version) = match_bump(&commit.summary) else {
            continue;
        };
        if version <= *baseline {
            tracing::debug!(%version, "reached baseline parity; stopping walk");
            break;
        }
        if out.iter().any(|p| p.version == version) {
            tracing::debug!(%version, commit = %commit.short_hash, "duplicate announcement");
            continue;
        }
        tracing::info!(%version, commit = %commit.short_hash, "new kernel available");
        out.push(PendingBuild {
            commit: commit.short_hash,
            version,
        });
    }

    out.sort_by(|a, b| a.version.cmp(&b.version));
    if let Some(max) = max_versions {
        out.truncate(max);
    }
    Ok(out)
}
