//! Shared build conventions.
//!
//! A [`Conventions`] value captures the settings a project family defines
//! once and applies to every consumer: compiler flags, test output, license
//! enforcement, style-rule wiring and documentation links. The struct is
//! plain data; install it into the root [`Scope`](crate::Scope) and read it
//! back from descendant scopes, or keep it in the blueprint
//! [`Settings`](crate::Settings).

use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conventions {
    pub compiler: CompilerConventions,
    pub test_logging: TestLogging,
    pub license: Option<LicenseConventions>,
    pub style: Option<StyleConventions>,
    pub doc: DocConventions,
}

/// Settings forwarded verbatim to whatever compiler the orchestrated build
/// invokes. The values are carried, not interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConventions {
    /// Extra flags appended to every compiler invocation.
    pub args: Vec<String>,
    /// Warn about uses of deprecated API.
    pub deprecation: bool,
    pub encoding: String,
    /// Language level the sources must stay compatible with.
    pub level: Option<String>,
}

impl Default for CompilerConventions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            deprecation: true,
            encoding: "UTF-8".to_string(),
            level: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionFormat {
    Full,
    Short,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogging {
    pub exception_format: ExceptionFormat,
    pub show_standard_streams: bool,
}

impl Default for TestLogging {
    fn default() -> Self {
        Self {
            exception_format: ExceptionFormat::Full,
            show_standard_streams: true,
        }
    }
}

/// License-header enforcement settings. The header file is consumed as an
/// opaque path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConventions {
    /// File containing the expected header text.
    pub header: Utf8PathBuf,
    /// Glob patterns, relative to the checked root, selecting the files the
    /// header applies to.
    pub includes: Vec<String>,
    /// Whether a blank line is expected between the header and the code.
    pub new_line: bool,
}

impl LicenseConventions {
    pub fn new(header: impl Into<Utf8PathBuf>) -> Self {
        Self {
            header: header.into(),
            includes: Vec::new(),
            new_line: false,
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }
}

/// Static-analysis rule configuration, carried as an opaque path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConventions {
    pub rules: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocConventions {
    /// External documentation sets to link against.
    pub links: Vec<String>,
    /// Suppress non-fatal documentation lint output.
    pub quiet: bool,
    pub encoding: String,
}

impl Default for DocConventions {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            quiet: true,
            encoding: "UTF-8".to_string(),
        }
    }
}

/// Walks the include globs under `root` and returns every matched file whose
/// text does not begin with the configured header.
///
/// Only the check half of header enforcement is provided; rewriting files is
/// left to the caller.
pub fn license_check(
    root: &Utf8Path,
    license: &LicenseConventions,
) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let header = fs::read_to_string(&license.header)
        .with_context(|| format!("reading license header: {}", license.header))?;
    let header = header.trim_end();

    let mut missing = Vec::new();

    for pattern in &license.includes {
        let pattern = root.join(pattern);

        for entry in glob::glob(pattern.as_str())? {
            let path = Utf8PathBuf::try_from(entry?)?;

            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading source file: {path}"))?;

            if !text.starts_with(header) {
                missing.push(path);
            }
        }
    }

    missing.sort();
    missing.dedup();

    Ok(missing)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn license_check_reports_files_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::write(root.join("HEADER.txt"), "// Copyright Example Org\n").unwrap();
        fs::write(
            root.join("ok.rs"),
            "// Copyright Example Org\nfn main() {}\n",
        )
        .unwrap();
        fs::write(root.join("bad.rs"), "fn main() {}\n").unwrap();

        let license = LicenseConventions::new(root.join("HEADER.txt")).include("*.rs");
        let missing = license_check(root, &license).unwrap();

        assert_eq!(missing, vec![root.join("bad.rs")]);
    }

    #[test]
    fn license_check_with_no_includes_matches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("HEADER.txt"), "// header\n").unwrap();

        let license = LicenseConventions::new(root.join("HEADER.txt"));
        assert!(license_check(root, &license).unwrap().is_empty());
    }

    #[test]
    fn defaults_mirror_the_shared_settings() {
        let conventions = Conventions::default();

        assert!(conventions.compiler.deprecation);
        assert_eq!(conventions.compiler.encoding, "UTF-8");
        assert_eq!(
            conventions.test_logging.exception_format,
            ExceptionFormat::Full
        );
        assert!(conventions.test_logging.show_standard_streams);
        assert!(conventions.license.is_none());
    }
}
