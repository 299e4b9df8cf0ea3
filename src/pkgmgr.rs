//! The host package manager as seen by the rebuilder.
//!
//! [`PackageManager`] covers the four queries the orchestrator needs. [`Dnf`]
//! implements them with `dnf` and `rpm`; tests substitute in-memory fakes.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

use crate::process::run_capture;

/// One line of repository query output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub name: String,
    pub version: String,
    pub release: String,
    pub repo: String,
    /// Keyword tokens reported alongside the record, if any.
    pub keywords: Vec<String>,
}

pub trait PackageManager {
    /// Every candidate of `name` in the given repositories.
    fn query(&self, name: &str, repos: &[&str]) -> Result<Vec<RepoRecord>>;

    /// Download the source package for `nvr` into `dest`.
    fn download_source(&self, nvr: &str, dest: &Path) -> Result<()>;

    /// Build requirement names declared by a source package file.
    fn source_requires(&self, source: &Path) -> Result<Vec<String>>;

    /// Names of every installed package.
    fn installed(&self) -> Result<Vec<String>>;
}

const QUERY_FORMAT: &str = "%{name}\t%{version}\t%{release}\t%{repoid}\n";

/// `dnf` for repository work, `rpm` for local package metadata.
#[derive(Debug, Clone, Default)]
pub struct Dnf;

impl PackageManager for Dnf {
    fn query(&self, name: &str, repos: &[&str]) -> Result<Vec<RepoRecord>> {
        let mut cmd = Command::new("dnf");
        cmd.arg("repoquery").arg("--quiet");
        for repo in repos {
            cmd.arg(format!("--repo={repo}"));
        }
        cmd.arg("--queryformat").arg(QUERY_FORMAT).arg(name);

        let out = run_capture(&mut cmd).with_context(|| format!("querying repositories for '{name}'"))?;
        Ok(parse_query_output(&out))
    }

    fn download_source(&self, nvr: &str, dest: &Path) -> Result<()> {
        let out = run_capture(
            Command::new("dnf")
                .arg("download")
                .arg("--quiet")
                .arg("--source")
                .arg("--destdir")
                .arg(dest)
                .arg(nvr),
        )
        .with_context(|| format!("downloading source package '{nvr}'"))?;
        if !out.trim().is_empty() {
            tracing::debug!(nvr, output = out.trim(), "dnf download");
        }
        Ok(())
    }

    fn source_requires(&self, source: &Path) -> Result<Vec<String>> {
        let out = run_capture(Command::new("rpm").arg("-qp").arg("--requires").arg(source))
            .with_context(|| format!("listing build requirements of '{}'", source.display()))?;
        Ok(parse_requires(&out))
    }

    fn installed(&self) -> Result<Vec<String>> {
        let out = run_capture(Command::new("rpm").args(["-qa", "--queryformat", "%{NAME}\n"]))
            .context("listing installed packages")?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Parse tab-separated `name version release repo [keywords...]` lines.
/// Lines with fewer than four fields are skipped.
pub fn parse_query_output(out: &str) -> Vec<RepoRecord> {
    out.lines()
        .filter_map(|line| {
            let mut fields = line.trim_end().split('\t').map(str::trim);
            let name = fields.next().filter(|s| !s.is_empty())?;
            let version = fields.next().filter(|s| !s.is_empty())?;
            let release = fields.next().filter(|s| !s.is_empty())?;
            let repo = fields.next().filter(|s| !s.is_empty())?;
            let keywords = fields
                .flat_map(|extra| extra.split([',', ' ']))
                .filter(|kw| !kw.is_empty())
                .map(String::from)
                .collect();
            Some(RepoRecord {
                name: name.to_string(),
                version: version.to_string(),
                release: release.to_string(),
                repo: repo.to_string(),
                keywords,
            })
        })
        .collect()
}

/// First whitespace-delimited token of each requirement line.
pub fn parse_requires(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_lines() {
        let out = "bash\t5.2.26\t3.fc40\tfedora\n\
                   bash\t5.2.32\t1.fc40\tupdates-testing\tprerelease,beta\n\
                   \n\
                   broken\tline\n";
        let records = parse_query_output(out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].repo, "fedora");
        assert!(records[0].keywords.is_empty());
        assert_eq!(records[1].version, "5.2.32");
        assert_eq!(records[1].keywords, ["prerelease", "beta"]);
    }

    #[test]
    fn requires_keep_first_token() {
        let out = "gcc\nncurses-devel >= 6.0\nrpmlib(CompressedFileNames) <= 3.0.4-1\n/bin/sh\n\n";
        assert_eq!(
            parse_requires(out),
            ["gcc", "ncurses-devel", "rpmlib(CompressedFileNames)", "/bin/sh"]
        );
    }
}
