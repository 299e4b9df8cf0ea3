//! Recursive rebuild driver.
//!
//! `build_pkg(name)` resolves `name`, fetches its source, builds every build
//! requirement first (depth-first, post-order), then builds `name` itself in a
//! fresh workspace and records it in the ledger. Names already in the ledger
//! are skipped, which also makes a restarted run resume where it stopped.
//!
//! A package that resolves to no candidate is skipped with a warning and left
//! out of the ledger so a later run can retry it. Every other failure
//! propagates to the caller; [`Orchestrator::rebuild_all`] logs it and moves
//! on to the next installed package.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::build::{BuildBackend, BuildJob};
use crate::config::Config;
use crate::container::{ContainerTool, Workspace};
use crate::deps::DependencyExtractor;
use crate::error::RebuildError;
use crate::fetch::SourceFetcher;
use crate::ledger::{BuildLedger, BuiltRecord};
use crate::pkgmgr::PackageManager;
use crate::repo::{Candidate, PackageResolver, VersionCompare};

/// The external collaborators an orchestrator drives.
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub pkgmgr: &'a dyn PackageManager,
    pub vercmp: &'a dyn VersionCompare,
    pub containers: &'a dyn ContainerTool,
    pub backend: &'a dyn BuildBackend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Already in the ledger; nothing was done.
    AlreadyBuilt,
    /// No usable candidate; nothing was built or recorded.
    Skipped,
    Built(BuiltRecord),
}

/// Result of a whole-system rebuild.
#[derive(Debug, Default)]
pub struct RebuildSummary {
    pub built: Vec<String>,
    pub already_built: Vec<String>,
    pub skipped: Vec<String>,
    /// Package name and the rendered error chain.
    pub failed: Vec<(String, String)>,
}

impl RebuildSummary {
    pub fn record(&mut self, name: &str, result: Result<BuildOutcome>) {
        let name = name.to_string();
        match result {
            Ok(BuildOutcome::Built(_)) => self.built.push(name),
            Ok(BuildOutcome::AlreadyBuilt) => self.already_built.push(name),
            Ok(BuildOutcome::Skipped) => self.skipped.push(name),
            Err(err) => {
                tracing::error!(package = %name, "build failed: {err:#}");
                self.failed.push((name, format!("{err:#}")));
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    tools: Tools<'a>,
    ledger: &'a BuildLedger,
    resolver: PackageResolver<'a>,
    fetcher: SourceFetcher<'a>,
    extractor: DependencyExtractor<'a>,
    /// Packages whose dependencies are being built right now, outermost first.
    in_progress: Vec<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, tools: Tools<'a>, ledger: &'a BuildLedger) -> Self {
        Self {
            config,
            tools,
            ledger,
            resolver: PackageResolver::new(config, tools.pkgmgr, tools.vercmp),
            fetcher: SourceFetcher::new(&config.system.cache_dir, tools.pkgmgr),
            extractor: DependencyExtractor::new(tools.pkgmgr, &config.policy.exclude),
            in_progress: Vec::new(),
        }
    }

    /// Build `name` and, first, its whole build-time dependency closure.
    pub fn build_pkg(&mut self, name: &str) -> Result<BuildOutcome> {
        if self.ledger.contains(name) {
            tracing::debug!(package = name, "already built");
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        if let Some(pos) = self.in_progress.iter().position(|p| p == name) {
            let mut chain = self.in_progress[pos..].to_vec();
            chain.push(name.to_string());
            return Err(RebuildError::CycleDetected { chain }.into());
        }

        let Some(candidate) = self
            .resolver
            .resolve(name)
            .with_context(|| format!("resolving '{name}'"))?
        else {
            tracing::warn!(package = name, "no buildable candidate; skipping");
            return Ok(BuildOutcome::Skipped);
        };

        self.in_progress.push(name.to_string());
        let result = self.build_candidate(name, &candidate);
        self.in_progress.pop();
        result
    }

    /// Rebuild every installed package that isn't excluded, in listing order.
    pub fn rebuild_all(&mut self) -> Result<RebuildSummary> {
        let installed = self.tools.pkgmgr.installed()?;
        let mut seen = HashSet::new();
        let targets: Vec<String> = installed
            .into_iter()
            .filter(|name| !self.config.policy.exclude.matches(name))
            .filter(|name| seen.insert(name.clone()))
            .collect();

        tracing::info!(packages = targets.len(), "rebuilding installed packages");
        let mut summary = RebuildSummary::default();
        for name in &targets {
            let result = self.build_pkg(name);
            summary.record(name, result);
        }
        Ok(summary)
    }

    fn build_candidate(&mut self, name: &str, candidate: &Candidate) -> Result<BuildOutcome> {
        let source = self
            .fetcher
            .fetch(candidate)
            .with_context(|| format!("fetching source for '{}'", candidate.nvr()))?;

        let deps = self
            .extractor
            .deps(&source)
            .with_context(|| format!("reading build requirements of '{}'", candidate.nvr()))?;
        for dep in &deps {
            if dep == name {
                continue;
            }
            self.build_pkg(dep)
                .with_context(|| format!("building dependency '{dep}' of '{name}'"))?;
        }

        let output_dir = self.prepare_output_dir(name)?;
        let container = container_name(&self.config.system.container_name_prefix, name);
        tracing::info!(nvr = %candidate.nvr(), container = %container, "building");

        let job = BuildJob {
            candidate,
            source: &source,
            feature_flags: self.config.feature_flags.for_package(name),
            compiler_flags: &self.config.compiler_flags,
            toolchain: &self.config.policy.toolchain,
            output_dir: &output_dir,
        };
        let artifacts = {
            let workspace =
                Workspace::create(self.tools.containers, &container, &self.config.system.base_image)
                    .with_context(|| format!("creating workspace for '{}'", candidate.nvr()))?;
            self.tools.backend.build(&workspace, &job)?
        };

        self.ledger
            .record(name, &candidate.version, &candidate.release)
            .with_context(|| format!("recording '{name}' in the build ledger"))?;
        tracing::info!(
            nvr = %candidate.nvr(),
            artifacts = artifacts.len(),
            output = %output_dir.display(),
            "built"
        );

        Ok(BuildOutcome::Built(BuiltRecord {
            version: candidate.version.clone(),
            release: candidate.release.clone(),
        }))
    }

    fn prepare_output_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.config.system.build_root.join(name);
        recreate_dir(&dir)?;
        Ok(dir)
    }
}

fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("removing stale output directory '{}'", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory '{}'", dir.display()))
}

/// `<prefix>-<package>-<pid>`, with characters container tools reject replaced.
pub fn container_name(prefix: &str, package: &str) -> String {
    let package: String = package
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}-{package}-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_sanitized() {
        let name = container_name("srcbuild", "libstdc++");
        assert!(name.starts_with("srcbuild-libstdc__-"));
        assert!(name.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn summary_tallies_outcomes() {
        let mut summary = RebuildSummary::default();
        summary.record("a", Ok(BuildOutcome::AlreadyBuilt));
        summary.record("b", Ok(BuildOutcome::Skipped));
        summary.record("c", Err(anyhow::anyhow!("boom")));
        assert_eq!(summary.already_built, ["a"]);
        assert_eq!(summary.skipped, ["b"]);
        assert_eq!(summary.failed, [("c".to_string(), "boom".to_string())]);
        assert!(!summary.is_success());
    }
}
