use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Architecture class of a kernel flavour. Decides whether a build on this
/// host needs the target's cross-compile environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchClass {
    Arm32,
    Arm64,
}

/// One kernel flavour the driver is built against. `suffix` is appended to
/// the kernel version for the DKMS invocation (`5.10.63-v7+`).
#[derive(Debug, Clone, Deserialize)]
pub struct BuildTarget {
    pub suffix: String,
    pub arch: ArchClass,
    #[serde(default)]
    pub cross_env: BTreeMap<String, String>,
}

impl BuildTarget {
    fn cross(suffix: &str, arch: ArchClass, env: &[(&str, &str)]) -> Self {
        Self {
            suffix: suffix.to_string(),
            arch,
            cross_env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Cross-compile only when the host is not already the target's class.
    pub fn needs_cross(&self, host: Option<ArchClass>) -> bool {
        host != Some(self.arch)
    }
}

const ARM32_ENV: &[(&str, &str)] = &[("ARCH", "arm"), ("CROSS_COMPILE", "arm-linux-gnueabihf-")];
const ARM64_ENV: &[(&str, &str)] = &[("ARCH", "arm64"), ("CROSS_COMPILE", "aarch64-linux-gnu-")];

/// The flavours shipped by the Raspberry Pi firmware releases.
pub fn builtin_targets() -> Vec<BuildTarget> {
    vec![
        BuildTarget::cross("", ArchClass::Arm32, ARM32_ENV),
        BuildTarget::cross("-v7", ArchClass::Arm32, ARM32_ENV),
        BuildTarget::cross("-v7l", ArchClass::Arm32, ARM32_ENV),
        BuildTarget::cross("-v8", ArchClass::Arm64, ARM64_ENV),
        BuildTarget::cross("-v8-16k", ArchClass::Arm64, ARM64_ENV),
    ]
}

#[derive(Debug, Default, Deserialize)]
struct TargetsDoc {
    #[serde(default, rename = "target")]
    targets: Vec<BuildTarget>,
}

/// Load an operator-supplied target table, replacing the built-in one.
pub fn load_targets(path: &Path) -> Result<Vec<BuildTarget>> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read targets file {}: {e}", path.display())))?;
    let doc: TargetsDoc = toml::from_str(&data)
        .map_err(|e| Error::Config(format!("invalid targets file {}: {e}", path.display())))?;
    validate(doc.targets)
}

fn validate(targets: Vec<BuildTarget>) -> Result<Vec<BuildTarget>> {
    if targets.is_empty() {
        return Err(Error::Config("targets file defines no [[target]] entries".into()));
    }
    let mut seen = BTreeSet::new();
    for t in &targets {
        if !seen.insert(t.suffix.as_str()) {
            return Err(Error::Config(format!(
                "duplicate target suffix '{}'",
                t.suffix
            )));
        }
    }
    Ok(targets)
}

pub fn host_arch_class() -> Option<ArchClass> {
    match std::env::consts::ARCH {
        "arm" => Some(ArchClass::Arm32),
        "aarch64" => Some(ArchClass::Arm64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_all_shipped_flavours() {
        let targets = builtin_targets();
        let suffixes: Vec<&str> = targets.iter().map(|t| t.suffix.as_str()).collect();
        assert_eq!(suffixes, ["", "-v7", "-v7l", "-v8", "-v8-16k"]);
        for t in &targets {
            assert!(t.cross_env.contains_key("CROSS_COMPILE"), "{}", t.suffix);
        }
    }

    #[test]
    fn cross_compile_is_skipped_on_a_matching_host() {
        let v7 = &builtin_targets()[1];
        assert!(!v7.needs_cross(Some(ArchClass::Arm32)));
        assert!(v7.needs_cross(Some(ArchClass::Arm64)));
        assert!(v7.needs_cross(None));
    }

    #[test]
    fn parses_an_override_table() {
        let doc: TargetsDoc = toml::from_str(
            r#"
[[target]]
suffix = "-v8"
arch = "arm64"

[target.cross_env]
ARCH = "arm64"
CROSS_COMPILE = "aarch64-linux-gnu-"
"#,
        )
        .expect("override table parses");
        let targets = validate(doc.targets).expect("table is valid");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].suffix, "-v8");
        assert_eq!(targets[0].arch, ArchClass::Arm64);
    }

    #[test]
    fn rejects_duplicate_suffixes() {
        let doc: TargetsDoc = toml::from_str(
            r#"
[[target]]
suffix = "-v7"
arch = "arm32"

[[target]]
suffix = "-v7"
arch = "arm64"
"#,
        )
        .expect("syntactically valid");
        let err = validate(doc.targets).unwrap_err().to_string();
        assert!(err.contains("duplicate target suffix"), "unexpected err: {err}");
    }
}
