//! Content-addressed cache of downloaded source packages.
//!
//! A source package lives at `<cache_dir>/<sha256(name-version-release)>.src.rpm`.
//! The file existing is the only record that it was fetched; nothing expires,
//! so clearing the directory is how an operator forces a re-download.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RebuildError;
use crate::pkgmgr::PackageManager;
use crate::repo::Candidate;

pub const SOURCE_SUFFIX: &str = ".src.rpm";

pub struct SourceFetcher<'a> {
    cache_dir: PathBuf,
    pkgmgr: &'a dyn PackageManager,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(cache_dir: impl Into<PathBuf>, pkgmgr: &'a dyn PackageManager) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            pkgmgr,
        }
    }

    /// Where the source package for `candidate` lives once fetched.
    pub fn cached_path(&self, candidate: &Candidate) -> PathBuf {
        self.cache_dir
            .join(format!("{}{SOURCE_SUFFIX}", cache_key(candidate)))
    }

    /// Return the cached source package for `candidate`, downloading it first
    /// on a miss.
    pub fn fetch(&self, candidate: &Candidate) -> Result<PathBuf> {
        let cached = self.cached_path(candidate);
        if cached.is_file() {
            tracing::debug!(nvr = %candidate.nvr(), path = %cached.display(), "source cache hit");
            return Ok(cached);
        }

        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("creating source cache '{}'", self.cache_dir.display())
        })?;

        let nvr = candidate.nvr();
        tracing::info!(nvr = %nvr, "downloading source package");
        self.pkgmgr.download_source(&nvr, &self.cache_dir)?;

        let downloaded =
            find_downloaded(&self.cache_dir, &nvr)?.ok_or_else(|| RebuildError::SourceNotFound {
                nvr: nvr.clone(),
                cache_dir: self.cache_dir.clone(),
            })?;

        // Same directory, so this is a single atomic rename.
        fs::rename(&downloaded, &cached).with_context(|| {
            format!(
                "moving '{}' to '{}'",
                downloaded.display(),
                cached.display()
            )
        })?;
        Ok(cached)
    }
}

/// Hex sha256 of `name-version-release`.
pub fn cache_key(candidate: &Candidate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(candidate.nvr().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn find_downloaded(dir: &Path, nvr: &str) -> Result<Option<PathBuf>> {
    let pattern = format!(
        "{}/{}*{SOURCE_SUFFIX}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(nvr)
    );
    let mut matches = glob::glob(&pattern)
        .with_context(|| format!("invalid download pattern '{pattern}'"))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file());
    Ok(matches.next())
}
