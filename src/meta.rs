//! Build metadata and archive manifest attributes.
//!
//! [`BuildMeta`] captures the identity a build server hands down through the
//! process environment. Values that are absent stay absent; nothing here
//! treats a missing variable as an error. [`Manifest`] is the attribute set
//! stamped into produced archives, with conditional population for the
//! optional values.

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;
use crate::scope::Scope;

pub const ENV_BUILD_NUMBER: &str = "BUILD_NUMBER";
pub const ENV_CI_SYSTEM: &str = "CI_SYSTEM";
pub const ENV_GIT_COMMIT: &str = "GIT_COMMIT";
pub const ENV_GIT_BRANCH: &str = "GIT_BRANCH";

/// Environment-derived build identity, set by the build server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildMeta {
    pub build_number: String,
    pub ci_system: Option<String>,
    pub commit: Option<String>,
    pub branch: Option<String>,
}

impl BuildMeta {
    /// Reads the well-known variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            build_number: lookup(ENV_BUILD_NUMBER).unwrap_or_else(|| "0".to_string()),
            ci_system: lookup(ENV_CI_SYSTEM),
            commit: lookup(ENV_GIT_COMMIT),
            branch: lookup(ENV_GIT_BRANCH),
        }
    }

    /// Fills a missing commit or branch by asking the local `git` executable
    /// about the repository at `repository`. Probe failures leave the fields
    /// as they were.
    #[cfg(feature = "git")]
    pub fn or_probe(mut self, repository: &str) -> Self {
        if self.commit.is_some() && self.branch.is_some() {
            return self;
        }

        if let Ok(identity) = crate::git::probe(repository) {
            self.commit.get_or_insert(identity.hash);
            self.branch.get_or_insert(identity.branch);
        }

        self
    }
}

/// An ordered attribute map stamped into a produced archive.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    attributes: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute unconditionally.
    pub fn entry(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets an attribute only when the value is present. Absence is a
    /// silent no-op, not an error.
    pub fn entry_opt(
        &mut self,
        key: impl Into<String>,
        value: Option<impl Into<String>>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.attributes.insert(key.into(), value.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Merges another manifest into this one. Entries from `other` overwrite
    /// entries in `self` if keys conflict.
    pub fn merge(&mut self, other: Manifest) {
        for (key, value) in other.attributes {
            self.attributes.insert(key, value);
        }
    }

    /// Populates the specification attributes from the scope keys `name`,
    /// `version` and `organization`. A missing key is a hard failure.
    pub fn specification(&mut self, scope: &Scope) -> Result<&mut Self, ScopeError> {
        let title = scope.get_str("name")?.to_string();
        let version = scope.get_str("version")?.to_string();
        let vendor = scope.get_str("organization")?.to_string();

        self.entry("Specification-Title", title);
        self.entry("Specification-Version", version);
        self.entry("Specification-Vendor", vendor);
        self.entry(
            "Created-By",
            concat!("kiln ", env!("CARGO_PKG_VERSION")),
        );

        Ok(self)
    }

    /// Stamps the version-control identity. Absent commit or branch values
    /// are skipped without error.
    pub fn git_identity(&mut self, meta: &BuildMeta) -> &mut Self {
        self.entry_opt("Git-Commit", meta.commit.clone());
        self.entry_opt("Git-Branch", meta.branch.clone());
        self
    }

    /// Serialize the attribute map to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Renders the canonical `Key: Value` block.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut acc = String::new();
        for (key, value) in &self.attributes {
            writeln!(&mut acc, "{key}: {value}").unwrap();
        }
        acc
    }
}

/// What to do when an archive would contain two entries with the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatesPolicy {
    Include,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub manifest: Manifest,
    pub duplicates: DuplicatesPolicy,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            manifest: Manifest::new(),
            duplicates: DuplicatesPolicy::Include,
        }
    }
}

impl ArchiveSettings {
    /// Archives still on the permissive default are tightened when
    /// configuration ends.
    pub(crate) fn normalize(&mut self) {
        if self.duplicates == DuplicatesPolicy::Include {
            self.duplicates = DuplicatesPolicy::Fail;
        }
    }
}
