//! Compiler flags, per-package feature flags and accepted keywords.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Reserved feature-flag scope that applies to every package without its own file.
pub const GLOBAL_SCOPE: &str = "global";

/// Compiler flags used when the flags file does not set them.
pub const FALLBACK_COMPILER_FLAGS: &[(&str, &str)] = &[("CFLAGS", "-O2 -pipe")];

/// Flag name to value, e.g. `CFLAGS` -> `-O2 -pipe`.
pub type CompilerFlags = BTreeMap<String, String>;

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, and a
/// value wrapped in double or single quotes is unwrapped.
pub fn parse_make_conf(contents: &str) -> CompilerFlags {
    let mut flags = CompilerFlags::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::debug!(line, "ignoring flags line without '='");
            continue;
        };
        flags.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    flags
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Merge fallbacks and the flags file, then synthesize `CXXFLAGS` from
/// `CFLAGS` and `MAKEOPTS` from the job count when either is missing.
pub fn resolve_compiler_flags(
    fallbacks: &[(&str, &str)],
    make_conf: Option<&str>,
    jobs: usize,
) -> CompilerFlags {
    let mut flags: CompilerFlags = fallbacks
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(contents) = make_conf {
        flags.extend(parse_make_conf(contents));
    }

    if !flags.contains_key("CXXFLAGS") {
        if let Some(cflags) = flags.get("CFLAGS").cloned() {
            flags.insert("CXXFLAGS".to_string(), cflags);
        }
    }
    flags
        .entry("MAKEOPTS".to_string())
        .or_insert_with(|| format!("-j{jobs}"));
    flags
}

/// Load the global compiler-flags file. A missing file yields the fallbacks.
pub fn load_compiler_flags(path: &Path, jobs: usize) -> Result<CompilerFlags> {
    let contents = read_optional(path)?;
    Ok(resolve_compiler_flags(
        FALLBACK_COMPILER_FLAGS,
        contents.as_deref(),
        jobs,
    ))
}

/// Feature-flag tokens keyed by scope (`global` or a package name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    scopes: BTreeMap<String, Vec<String>>,
}

impl FeatureFlags {
    pub fn new(global: Vec<String>) -> Self {
        Self {
            scopes: BTreeMap::from([(GLOBAL_SCOPE.to_string(), global)]),
        }
    }

    /// Read one file per package from `dir`; the whole file name is the
    /// package name, so dotted names like `python3.12` keep their suffix.
    pub fn load(dir: &Path, global: Vec<String>) -> Result<Self> {
        let mut flags = Self::new(global);
        if !dir.is_dir() {
            return Ok(flags);
        }

        for entry in fs::read_dir(dir)
            .with_context(|| format!("reading feature flag directory '{}'", dir.display()))?
        {
            let entry = entry
                .with_context(|| format!("iterating feature flag directory '{}'", dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(scope) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if scope.starts_with('.') {
                continue;
            }
            if scope == GLOBAL_SCOPE {
                tracing::warn!(
                    path = %path.display(),
                    "ignoring flag file for reserved scope; set [build] use instead"
                );
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading feature flags '{}'", path.display()))?;
            flags.insert(scope, contents.split_whitespace().map(String::from).collect());
        }

        Ok(flags)
    }

    pub fn insert(&mut self, scope: &str, tokens: Vec<String>) {
        self.scopes.insert(scope.to_string(), tokens);
    }

    /// Flags for `package`, falling back to the global scope.
    pub fn for_package(&self, package: &str) -> &[String] {
        self.scopes
            .get(package)
            .or_else(|| self.scopes.get(GLOBAL_SCOPE))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }
}

/// Package names allowed to resolve to unstable candidates, one per line.
/// Only the first token of a line is used, so `name ~x86_64` works too.
pub fn load_accepted_keywords(path: &Path) -> Result<BTreeSet<String>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(BTreeSet::new());
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(String::from)
        .collect())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("reading '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn synthesizes_cxxflags_and_makeopts() {
        let flags = resolve_compiler_flags(&[("CFLAGS", "-O2 -pipe")], None, 4);
        let expected = CompilerFlags::from([
            ("CFLAGS".to_string(), "-O2 -pipe".to_string()),
            ("CXXFLAGS".to_string(), "-O2 -pipe".to_string()),
            ("MAKEOPTS".to_string(), "-j4".to_string()),
        ]);
        assert_eq!(flags, expected);
    }

    #[test]
    fn flags_file_overrides_fallbacks() {
        let conf = "# tuned\nCFLAGS=\"-O3 -march=native\"\n\nLDFLAGS=-Wl,-O1\nMAKEOPTS=-j2\n";
        let flags = resolve_compiler_flags(FALLBACK_COMPILER_FLAGS, Some(conf), 16);
        assert_eq!(flags["CFLAGS"], "-O3 -march=native");
        assert_eq!(flags["CXXFLAGS"], "-O3 -march=native");
        assert_eq!(flags["LDFLAGS"], "-Wl,-O1");
        assert_eq!(flags["MAKEOPTS"], "-j2");
    }

    #[test]
    fn explicit_cxxflags_kept() {
        let flags = resolve_compiler_flags(
            FALLBACK_COMPILER_FLAGS,
            Some("CXXFLAGS=-O1\n"),
            1,
        );
        assert_eq!(flags["CFLAGS"], "-O2 -pipe");
        assert_eq!(flags["CXXFLAGS"], "-O1");
    }

    #[test]
    fn missing_flags_file_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let flags = load_compiler_flags(&tmp.path().join("make.conf"), 3).unwrap();
        assert_eq!(flags["MAKEOPTS"], "-j3");
        assert_eq!(flags.len(), 3);
    }

    #[test]
    fn per_package_flags_fall_back_to_global() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("vim"), "X -gtk\n python ").unwrap();
        fs::write(tmp.path().join("global"), "ignored").unwrap();

        let flags = FeatureFlags::load(tmp.path(), vec!["ipv6".to_string()]).unwrap();
        assert_eq!(flags.for_package("vim"), ["X", "-gtk", "python"]);
        assert_eq!(flags.for_package("bash"), ["ipv6"]);
        assert_eq!(flags.scopes().collect::<Vec<_>>(), ["global", "vim"]);
    }

    #[test]
    fn dotted_package_names_keep_their_scope() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("python3.12"), "-tk\n").unwrap();

        let flags = FeatureFlags::load(tmp.path(), vec!["ipv6".to_string()]).unwrap();
        assert_eq!(flags.for_package("python3.12"), ["-tk"]);
        assert_eq!(flags.for_package("python3"), ["ipv6"]);
        assert_eq!(flags.scopes().collect::<Vec<_>>(), ["global", "python3.12"]);
    }

    #[test]
    fn missing_flag_dir_keeps_global() {
        let tmp = TempDir::new().unwrap();
        let flags = FeatureFlags::load(&tmp.path().join("nope"), vec![]).unwrap();
        assert!(flags.for_package("anything").is_empty());
    }

    #[test]
    fn accepted_keywords_skip_comments() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keywords");
        fs::write(&path, "# unstable ok\nmesa\n\n  kernel ~x86_64\n").unwrap();
        let accepted = load_accepted_keywords(&path).unwrap();
        assert_eq!(
            accepted,
            BTreeSet::from(["kernel".to_string(), "mesa".to_string()])
        );
    }
}
