//! Queries the local `git` executable for build identity metadata.
//!
//! Used as a fallback when the build server did not export the
//! version-control environment variables.

use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, FixedOffset};

pub const GIT_EXEC: &str = "git";

/// Identity of `HEAD` in a local repository.
#[derive(Debug, Clone)]
pub struct GitIdentity {
    pub hash: String,
    pub abbreviated_hash: String,
    pub branch: String,
    pub commit_date: DateTime<FixedOffset>,
}

/// Runs a git command with the given arguments and returns the output.
fn git(args: &[&str]) -> Result<String> {
    let output = Command::new(GIT_EXEC)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git with args {args:?}"))?;

    if !output.status.success() {
        return Err(anyhow!(
            "{}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Reads the identity of `HEAD` in the repository at `repository`.
pub fn probe(repository: &str) -> Result<GitIdentity> {
    let branch = git(&["-C", repository, "rev-parse", "--abbrev-ref", "HEAD"])?
        .trim()
        .to_string();

    // Fields separated by the unit separator, one record for HEAD.
    let entry = git(&[
        "-C",
        repository,
        "log",
        "-1",
        "--format=format:%H\x1f%h\x1f%ci",
    ])?;

    to_identity(entry.trim(), branch)
}

/// Parses a git log entry (separated by control characters) into a
/// [`GitIdentity`].
fn to_identity(entry: &str, branch: String) -> Result<GitIdentity> {
    let items: Vec<&str> = entry.split('\x1f').collect();

    if items.len() != 3 {
        return Err(anyhow!("unexpected number of fields in entry: {items:?}"));
    }

    // The "%ci" format corresponds to "%Y-%m-%d %H:%M:%S %z" in chrono.
    let commit_date = DateTime::parse_from_str(items[2], "%Y-%m-%d %H:%M:%S %z")
        .with_context(|| format!("parsing commit date: {}", items[2]))?;

    Ok(GitIdentity {
        hash: items[0].to_string(),
        abbreviated_hash: items[1].to_string(),
        branch,
        commit_date,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_log_entry() {
        let entry = "1fc0ab7a6a55ba1f7ce40e394475f2518e6cae13\x1f1fc0ab7\x1f2017-06-04 12:30:00 +0200";
        let identity = to_identity(entry, "main".to_string()).unwrap();

        assert_eq!(identity.hash, "1fc0ab7a6a55ba1f7ce40e394475f2518e6cae13");
        assert_eq!(identity.abbreviated_hash, "1fc0ab7");
        assert_eq!(identity.branch, "main");
        assert_eq!(identity.commit_date.to_rfc3339(), "2017-06-04T12:30:00+02:00");
    }

    #[test]
    fn rejects_malformed_entries() {
        let err = to_identity("not-enough-fields", "main".to_string()).unwrap_err();
        assert!(err.to_string().contains("unexpected number of fields"));
    }
}
