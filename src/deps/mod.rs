//! Build-time dependency edges of a source package.

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::ExcludeSet;
use crate::pkgmgr::PackageManager;

/// Prefix of rpm's internal capability requirements, e.g. `rpmlib(CompressedFileNames)`.
const RPMLIB_PREFIX: &str = "rpmlib(";

pub struct DependencyExtractor<'a> {
    pkgmgr: &'a dyn PackageManager,
    exclude: &'a ExcludeSet,
}

impl<'a> DependencyExtractor<'a> {
    pub fn new(pkgmgr: &'a dyn PackageManager, exclude: &'a ExcludeSet) -> Self {
        Self { pkgmgr, exclude }
    }

    /// Requirement names of `source`, without packaging-internal entries,
    /// file paths, or excluded names.
    pub fn deps(&self, source: &Path) -> Result<BTreeSet<String>> {
        let raw = self.pkgmgr.source_requires(source)?;
        Ok(filter_requirements(raw, self.exclude))
    }
}

pub fn filter_requirements<I>(raw: I, exclude: &ExcludeSet) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    raw.into_iter()
        .filter(|req| !req.is_empty())
        .filter(|req| !req.starts_with(RPMLIB_PREFIX) && !req.starts_with('/'))
        .filter(|req| !exclude.matches(req))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkgmgr::RepoRecord;

    struct FakeRequires(Vec<&'static str>);

    impl PackageManager for FakeRequires {
        fn query(&self, _: &str, _: &[&str]) -> Result<Vec<RepoRecord>> {
            unreachable!()
        }
        fn download_source(&self, _: &str, _: &Path) -> Result<()> {
            unreachable!()
        }
        fn source_requires(&self, _: &Path) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
        fn installed(&self) -> Result<Vec<String>> {
            unreachable!()
        }
    }

    #[test]
    fn drops_internal_paths_and_excluded() {
        let pm = FakeRequires(vec![
            "gcc",
            "rpmlib(CompressedFileNames)",
            "/bin/sh",
            "ncurses-devel",
            "gcc",
            "glibc-devel",
            "rpmlib(FileDigests)",
            "/usr/bin/pkg-config",
        ]);
        let exclude = ExcludeSet::new(&["glibc*"]).unwrap();
        let deps = DependencyExtractor::new(&pm, &exclude)
            .deps(Path::new("x.src.rpm"))
            .unwrap();
        assert_eq!(
            deps,
            BTreeSet::from(["gcc".to_string(), "ncurses-devel".to_string()])
        );
    }

    #[test]
    fn empty_requirements_give_empty_set() {
        let pm = FakeRequires(vec![]);
        let exclude = ExcludeSet::default();
        assert!(DependencyExtractor::new(&pm, &exclude)
            .deps(Path::new("x.src.rpm"))
            .unwrap()
            .is_empty());
    }
}
