//! Candidate lookup and selection.
//!
//! Selection runs in four stages:
//!
//! 1. drop candidates whose name matches an exclusion pattern
//! 2. drop candidates carrying an unstable keyword, unless the requested
//!    package is listed in the accepted-keywords file
//! 3. rank the survivors by [`Tier`]
//! 4. break ties inside the best tier by version, newest wins
//!
//! A higher tier always beats a newer version in a lower tier.

pub mod version;

use anyhow::Result;
use std::cmp::Ordering;

use crate::config::{Config, REPO_GROUP_ROLLING, REPO_GROUP_TESTING, REPO_GROUP_VCS};
use crate::pkgmgr::PackageManager;
pub use version::{default_comparator, NativeVercmp, Rpmdevvercmp, VersionCompare};

/// Alphabetic release markers that identify a VCS snapshot build.
const VCS_RELEASE_MARKERS: &[&str] = &["git", "svn", "hg", "bzr", "cvs", "darcs"];

/// One buildable version of a package reported by a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub version: String,
    pub release: String,
    pub repo: String,
    pub keywords: Vec<String>,
}

impl Candidate {
    /// `name-version-release`, the form the package manager accepts.
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }
}

/// Selection priority by origin, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Stable,
    Testing,
    Rolling,
    Vcs,
}

/// True when the release string carries a VCS snapshot marker, e.g.
/// `0.3.20240105git1a2b3c4.fc40`.
pub fn is_vcs_release(release: &str) -> bool {
    release
        .split(|c: char| !c.is_ascii_alphabetic())
        .any(|word| VCS_RELEASE_MARKERS.contains(&word.to_ascii_lowercase().as_str()))
}

pub struct PackageResolver<'a> {
    config: &'a Config,
    pkgmgr: &'a dyn PackageManager,
    vercmp: &'a dyn VersionCompare,
}

impl<'a> PackageResolver<'a> {
    pub fn new(
        config: &'a Config,
        pkgmgr: &'a dyn PackageManager,
        vercmp: &'a dyn VersionCompare,
    ) -> Self {
        Self {
            config,
            pkgmgr,
            vercmp,
        }
    }

    /// All candidates for `name` across every configured repository.
    ///
    /// Each candidate's keywords include the name of the repository group it
    /// came from, so `unstable_keywords = testing rolling` masks those groups.
    pub fn query(&self, name: &str) -> Result<Vec<Candidate>> {
        let repos = self.config.all_repo_ids();
        if repos.is_empty() {
            tracing::warn!(name, "no repositories configured");
            return Ok(Vec::new());
        }

        let records = self.pkgmgr.query(name, &repos)?;
        Ok(records
            .into_iter()
            .map(|record| {
                let mut keywords = record.keywords;
                if let Some(group) = self.config.repo_group(&record.repo) {
                    if !keywords.iter().any(|kw| kw == group) {
                        keywords.push(group.to_string());
                    }
                }
                Candidate {
                    name: record.name,
                    version: record.version,
                    release: record.release,
                    repo: record.repo,
                    keywords,
                }
            })
            .collect())
    }

    pub fn tier(&self, candidate: &Candidate) -> Tier {
        if is_vcs_release(&candidate.release) {
            return Tier::Vcs;
        }
        match self.config.repo_group(&candidate.repo) {
            Some(REPO_GROUP_VCS) => Tier::Vcs,
            Some(REPO_GROUP_ROLLING) => Tier::Rolling,
            Some(REPO_GROUP_TESTING) => Tier::Testing,
            _ => Tier::Stable,
        }
    }

    /// Pick the single best candidate for `name`, or `None` if every
    /// candidate was filtered out.
    pub fn pick_best(&self, candidates: &[Candidate], name: &str) -> Result<Option<Candidate>> {
        let policy = &self.config.policy;
        let accept_unstable = self.config.accepted_keywords.contains(name);

        let mut best: Option<(Tier, &Candidate)> = None;
        for candidate in candidates {
            if policy.exclude.matches(&candidate.name) {
                tracing::debug!(nvr = %candidate.nvr(), "excluded by pattern");
                continue;
            }
            if !accept_unstable
                && candidate
                    .keywords
                    .iter()
                    .any(|kw| policy.unstable_keywords.contains(kw))
            {
                tracing::debug!(nvr = %candidate.nvr(), "masked by unstable keyword");
                continue;
            }

            let tier = self.tier(candidate);
            let replace = match best {
                None => true,
                Some((best_tier, current)) => match tier.cmp(&best_tier) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        self.compare_evr(candidate, current)? == Ordering::Greater
                    }
                },
            };
            if replace {
                best = Some((tier, candidate));
            }
        }

        Ok(best.map(|(_, candidate)| candidate.clone()))
    }

    /// Query and select in one step.
    pub fn resolve(&self, name: &str) -> Result<Option<Candidate>> {
        let candidates = self.query(name)?;
        self.pick_best(&candidates, name)
    }

    fn compare_evr(&self, a: &Candidate, b: &Candidate) -> Result<Ordering> {
        let ord = self.vercmp.compare(&a.version, &b.version)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
        self.vercmp.compare(&a.release, &b.release)
    }
}
