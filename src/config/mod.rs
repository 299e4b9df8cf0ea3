//! Configuration snapshot.
//!
//! Sources, in increasing precedence:
//!
//! 1. Compiled-in defaults ([`Settings::default`])
//! 2. The INI override file, which may only override keys the defaults define
//! 3. The compiler-flags file (`KEY=VALUE`)
//! 4. The per-package feature-flag directory
//! 5. The accepted-keywords file
//!
//! Missing files fall back to defaults. Override values that don't fit the
//! declared type of their key are collected and reported together.
//!
//! The resulting [`Config`] is built once and handed to every component by
//! reference; nothing downstream re-reads files or re-detects the CPU count.

pub mod flags;
pub mod ini;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, InvalidKey, RebuildError};
pub use flags::{CompilerFlags, FeatureFlags, GLOBAL_SCOPE};

/// Default location of the INI override file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/source-rebuilder/rebuilder.conf";

/// Repository groups in tier order, lowest first.
pub const REPO_GROUP_STABLE: &str = "stable";
pub const REPO_GROUP_TESTING: &str = "testing";
pub const REPO_GROUP_ROLLING: &str = "rolling";
pub const REPO_GROUP_VCS: &str = "vcs";

/// Job parallelism as written in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jobs {
    Auto,
    Count(usize),
}

impl Jobs {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("auto") {
            return Some(Self::Auto);
        }
        match raw.parse::<usize>() {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(Self::Count(n)),
        }
    }

    fn resolve(self) -> usize {
        match self {
            Self::Auto => num_cpus::get().max(1),
            Self::Count(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSettings {
    pub arch: String,
    pub distro_version: String,
    pub base_image: String,
    pub build_root: PathBuf,
    pub cache_dir: PathBuf,
    pub state_file: PathBuf,
    pub use_dir: PathBuf,
    pub keywords_file: PathBuf,
    pub make_conf: PathBuf,
    pub container_name_prefix: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            arch: "x86_64".to_string(),
            distro_version: "40".to_string(),
            base_image: "registry.fedoraproject.org/fedora:40".to_string(),
            build_root: PathBuf::from("/var/lib/source-rebuilder/packages"),
            cache_dir: PathBuf::from("/var/cache/source-rebuilder/srpms"),
            state_file: PathBuf::from("/var/lib/source-rebuilder/state.json"),
            use_dir: PathBuf::from("/etc/source-rebuilder/package.use"),
            keywords_file: PathBuf::from("/etc/source-rebuilder/package.accept_keywords"),
            make_conf: PathBuf::from("/etc/source-rebuilder/make.conf"),
            container_name_prefix: "srcbuild".to_string(),
        }
    }
}

/// Typed settings before anything is resolved against the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub system: SystemSettings,
    pub repos: BTreeMap<String, Vec<String>>,
    pub jobs: Jobs,
    pub exclude: Vec<String>,
    pub default_use: Vec<String>,
    pub unstable_keywords: Vec<String>,
    pub toolchain: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system: SystemSettings::default(),
            repos: BTreeMap::from([
                (REPO_GROUP_STABLE.to_string(), words("fedora updates")),
                (REPO_GROUP_TESTING.to_string(), words("updates-testing")),
                (REPO_GROUP_ROLLING.to_string(), words("rawhide")),
                (REPO_GROUP_VCS.to_string(), Vec::new()),
            ]),
            jobs: Jobs::Auto,
            exclude: words("kernel* glibc* *-debuginfo *-debugsource gpg-pubkey"),
            default_use: Vec::new(),
            unstable_keywords: words("testing rolling"),
            toolchain: words("rpm-build dnf-plugins-core gcc gcc-c++ make redhat-rpm-config"),
        }
    }
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

/// What a key expects, used in error messages.
const EXPECT_STRING: &str = "a string";
const EXPECT_PATH: &str = "a non-empty path";
const EXPECT_JOBS: &str = "'auto' or a positive integer";
const EXPECT_GLOBS: &str = "whitespace-separated glob patterns";

impl Settings {
    /// Defaults with the override file at `path` applied, if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::default();
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no override file; using defaults");
            return Ok(settings);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading configuration '{}'", path.display()))?;
        settings
            .apply_overrides(path, &contents)
            .map_err(RebuildError::from)?;
        Ok(settings)
    }

    /// Apply INI overrides, collecting every invalid key before failing.
    pub fn apply_overrides(&mut self, path: &Path, contents: &str) -> Result<(), ConfigError> {
        let sections = ini::parse(path, contents)?;
        let mut invalid = Vec::new();

        for (section, entries) in &sections {
            for (key, value) in entries {
                match self.apply(section, key, value) {
                    None => {
                        tracing::debug!(section, key, "ignoring unknown configuration key")
                    }
                    Some(Ok(())) => {}
                    Some(Err(expected)) => invalid.push(InvalidKey {
                        section: section.clone(),
                        key: key.clone(),
                        value: value.clone(),
                        expected,
                    }),
                }
            }
        }

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                keys: invalid,
            })
        }
    }

    /// `None` when the key has no default, `Some(Err(expected))` when the
    /// value can't be converted to the key's type.
    fn apply(&mut self, section: &str, key: &str, raw: &str) -> Option<Result<(), &'static str>> {
        let sys = &mut self.system;
        let result = match (section, key) {
            ("system", "arch") => set_string(&mut sys.arch, raw),
            ("system", "distro_version") => set_string(&mut sys.distro_version, raw),
            ("system", "base_image") => set_string(&mut sys.base_image, raw),
            ("system", "container_name_prefix") => {
                set_string(&mut sys.container_name_prefix, raw)
            }
            ("system", "build_root") => set_path(&mut sys.build_root, raw),
            ("system", "cache_dir") => set_path(&mut sys.cache_dir, raw),
            ("system", "state_file") => set_path(&mut sys.state_file, raw),
            ("system", "use_dir") => set_path(&mut sys.use_dir, raw),
            ("system", "keywords_file") => set_path(&mut sys.keywords_file, raw),
            ("system", "make_conf") => set_path(&mut sys.make_conf, raw),
            ("repos", group) => {
                let repos = self.repos.get_mut(group)?;
                *repos = words(raw);
                Ok(())
            }
            ("build", "jobs") => Jobs::parse(raw)
                .map(|jobs| self.jobs = jobs)
                .ok_or(EXPECT_JOBS),
            ("build", "exclude") => {
                let patterns = words(raw);
                if patterns.iter().all(|p| glob::Pattern::new(p).is_ok()) {
                    self.exclude = patterns;
                    Ok(())
                } else {
                    Err(EXPECT_GLOBS)
                }
            }
            ("build", "use") => {
                self.default_use = words(raw);
                Ok(())
            }
            ("build", "unstable_keywords") => {
                self.unstable_keywords = words(raw);
                Ok(())
            }
            ("build", "toolchain") => {
                self.toolchain = words(raw);
                Ok(())
            }
            _ => return None,
        };
        Some(result)
    }
}

fn set_string(slot: &mut String, raw: &str) -> Result<(), &'static str> {
    // Any text is a valid string; an unbalanced quote is the only thing to reject.
    let value = raw.trim();
    if value.starts_with('"') != value.ends_with('"') {
        return Err(EXPECT_STRING);
    }
    *slot = value.trim_matches('"').to_string();
    Ok(())
}

fn set_path(slot: &mut PathBuf, raw: &str) -> Result<(), &'static str> {
    let value = raw.trim().trim_matches('"');
    if value.is_empty() {
        return Err(EXPECT_PATH);
    }
    *slot = PathBuf::from(value);
    Ok(())
}

/// Glob patterns for package names that are never resolved or built.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref())
                    .with_context(|| format!("invalid exclusion pattern '{}'", p.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

#[derive(Debug, Clone)]
pub struct BuildPolicy {
    /// Resolved job count; `auto` has already been replaced by the CPU count.
    pub jobs: usize,
    pub exclude: ExcludeSet,
    pub unstable_keywords: BTreeSet<String>,
    pub toolchain: Vec<String>,
}

/// Immutable configuration snapshot for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub system: SystemSettings,
    /// Repository group name -> ordered repository ids.
    pub repos: BTreeMap<String, Vec<String>>,
    pub policy: BuildPolicy,
    pub compiler_flags: CompilerFlags,
    pub feature_flags: FeatureFlags,
    /// Package names allowed to use unstable candidates.
    pub accepted_keywords: BTreeSet<String>,
}

impl Config {
    /// Load the override file at `path` and every file it points at.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Settings::load(path)?;
        Self::from_settings(settings)
    }

    /// Resolve typed settings against the host: CPU count and on-disk flag files.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let jobs = settings.jobs.resolve();
        let system = settings.system;

        let compiler_flags = flags::load_compiler_flags(&system.make_conf, jobs)?;
        let feature_flags = FeatureFlags::load(&system.use_dir, settings.default_use)?;
        let accepted_keywords = flags::load_accepted_keywords(&system.keywords_file)?;

        let policy = BuildPolicy {
            jobs,
            exclude: ExcludeSet::new(&settings.exclude)?,
            unstable_keywords: settings.unstable_keywords.into_iter().collect(),
            toolchain: settings.toolchain,
        };

        tracing::debug!(
            jobs,
            accepted = accepted_keywords.len(),
            "configuration resolved"
        );

        Ok(Self {
            system,
            repos: settings.repos,
            policy,
            compiler_flags,
            feature_flags,
            accepted_keywords,
        })
    }

    /// Every repository id across every group, in group then listing order.
    pub fn all_repo_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.repos
            .values()
            .flatten()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Name of the group a repository id belongs to.
    pub fn repo_group(&self, repo_id: &str) -> Option<&str> {
        self.repos
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == repo_id))
            .map(|(group, _)| group.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn isolated_settings(tmp: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.system.make_conf = tmp.join("make.conf");
        settings.system.use_dir = tmp.join("package.use");
        settings.system.keywords_file = tmp.join("package.accept_keywords");
        settings
    }

    #[test]
    fn overrides_replace_existing_keys() {
        let mut settings = Settings::default();
        let text = "\
[system]
arch = aarch64
build_root = /srv/build

[repos]
stable = fedora updates extras
unknown_group = ignored

[build]
jobs = 8
exclude = kernel* firefox
use = -X wayland
";
        settings.apply_overrides(Path::new("t"), text).unwrap();
        assert_eq!(settings.system.arch, "aarch64");
        assert_eq!(settings.system.build_root, PathBuf::from("/srv/build"));
        assert_eq!(settings.repos["stable"], ["fedora", "updates", "extras"]);
        assert!(!settings.repos.contains_key("unknown_group"));
        assert_eq!(settings.jobs, Jobs::Count(8));
        assert_eq!(settings.exclude, ["kernel*", "firefox"]);
        assert_eq!(settings.default_use, ["-X", "wayland"]);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(Path::new("t"), "[system]\ncolour = blue\n[extra]\nx = 1\n")
            .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn reports_every_invalid_key() {
        let mut settings = Settings::default();
        let text = "[build]\njobs = many\nexclude = [oops\n[system]\nstate_file =\n";
        let err = settings
            .apply_overrides(Path::new("bad.conf"), text)
            .unwrap_err();
        let ConfigError::Invalid { keys, .. } = err else {
            panic!("expected invalid keys");
        };
        let names: Vec<_> = keys.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(names, ["exclude", "jobs", "state_file"]);
    }

    #[test]
    fn zero_jobs_is_invalid() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_overrides(Path::new("t"), "[build]\njobs = 0\n")
            .is_err());
    }

    #[test]
    fn missing_override_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("missing.conf")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_surfaces_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rebuilder.conf");
        fs::write(&path, "[build]\njobs = -1\n").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RebuildError>(),
            Some(RebuildError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn snapshot_resolves_jobs_and_flags() {
        let tmp = TempDir::new().unwrap();
        let mut settings = isolated_settings(tmp.path());
        settings.jobs = Jobs::Count(4);

        let config = Config::from_settings(settings).unwrap();
        assert_eq!(config.policy.jobs, 4);
        assert_eq!(
            config.compiler_flags,
            CompilerFlags::from([
                ("CFLAGS".to_string(), "-O2 -pipe".to_string()),
                ("CXXFLAGS".to_string(), "-O2 -pipe".to_string()),
                ("MAKEOPTS".to_string(), "-j4".to_string()),
            ])
        );
        assert!(config.accepted_keywords.is_empty());
    }

    #[test]
    fn load_merges_every_layer() {
        let tmp = TempDir::new().unwrap();
        let etc = tmp.path().join("etc");
        fs::create_dir_all(etc.join("flags")).unwrap();
        fs::write(etc.join("cflags.conf"), "CFLAGS=\"-O3 -march=native\"\nLDFLAGS=-Wl,-O1\n").unwrap();
        fs::write(etc.join("flags").join("mesa"), "-vulkan llvm\n").unwrap();
        fs::write(etc.join("accept"), "mesa\n# none\n").unwrap();

        let conf = etc.join("rebuilder.conf");
        let text = format!(
            "[system]\n\
             make_conf = {make}\n\
             use_dir = {uses}\n\
             keywords_file = {keywords}\n\
             [build]\n\
             jobs = 6\n\
             use = ipv6 -doc\n\
             unstable_keywords = testing\n",
            make = etc.join("cflags.conf").display(),
            uses = etc.join("flags").display(),
            keywords = etc.join("accept").display(),
        );
        fs::write(&conf, text).unwrap();

        let config = Config::load(&conf).unwrap();
        assert_eq!(config.system.make_conf, etc.join("cflags.conf"));
        assert_eq!(config.policy.jobs, 6);
        assert_eq!(config.compiler_flags["CFLAGS"], "-O3 -march=native");
        assert_eq!(config.compiler_flags["CXXFLAGS"], "-O3 -march=native");
        assert_eq!(config.compiler_flags["LDFLAGS"], "-Wl,-O1");
        assert_eq!(config.compiler_flags["MAKEOPTS"], "-j6");
        assert_eq!(config.feature_flags.for_package("mesa"), ["-vulkan", "llvm"]);
        assert_eq!(config.feature_flags.for_package("bash"), ["ipv6", "-doc"]);
        assert_eq!(config.accepted_keywords, BTreeSet::from(["mesa".to_string()]));
        assert_eq!(
            config.policy.unstable_keywords,
            BTreeSet::from(["testing".to_string()])
        );
    }

    #[test]
    fn auto_jobs_uses_cpu_count() {
        let tmp = TempDir::new().unwrap();
        let config = Config::from_settings(isolated_settings(tmp.path())).unwrap();
        assert_eq!(config.policy.jobs, num_cpus::get().max(1));
    }

    #[test]
    fn repo_lookup_helpers() {
        let tmp = TempDir::new().unwrap();
        let config = Config::from_settings(isolated_settings(tmp.path())).unwrap();
        assert_eq!(config.repo_group("updates-testing"), Some("testing"));
        assert_eq!(config.repo_group("nowhere"), None);
        assert_eq!(
            config.all_repo_ids(),
            ["rawhide", "fedora", "updates", "updates-testing"]
        );
    }

    #[test]
    fn exclusion_patterns_match_globs() {
        let set = ExcludeSet::new(&["kernel*", "*-debuginfo"]).unwrap();
        assert!(set.matches("kernel-core"));
        assert!(set.matches("bash-debuginfo"));
        assert!(!set.matches("bash"));
    }
}
