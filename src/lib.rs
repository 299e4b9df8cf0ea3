//! Rebuild an rpm-based system's packages from source.
//!
//! Each installed package is resolved to the best available source package,
//! its build requirements are rebuilt first, and it is then compiled in a
//! throwaway container with per-package feature flags (Gentoo USE-style) and
//! global compiler flags (make.conf-style) applied.
//!
//! # Architecture
//!
//! ```text
//! config        defaults + rebuilder.conf + make.conf + package.use/ + keywords
//!     │         → one immutable Config, passed by reference everywhere
//!     ▼
//! repo          query repositories, pick the best candidate (tier, then version)
//! fetch         download the source package into a sha256-keyed cache
//! deps          read its build requirements
//!     │
//!     ▼
//! orchestrator  depth-first: build deps, then build in a container workspace,
//!               record the result in the ledger
//! ```
//!
//! External programs (`dnf`, `rpm`, `rpmdev-vercmp`, `buildah`) sit behind
//! the [`PackageManager`], [`VersionCompare`], [`ContainerTool`] and
//! [`BuildBackend`] traits.
//!
//! # Example
//!
//! ```rust,no_run
//! use source_rebuilder::{
//!     BuildLedger, Buildah, Config, Dnf, NativeVercmp, Orchestrator, RpmBuildBackend, Tools,
//! };
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("/etc/source-rebuilder/rebuilder.conf"))?;
//! let ledger = BuildLedger::load(&config.system.state_file)?;
//! let tools = Tools {
//!     pkgmgr: &Dnf,
//!     vercmp: &NativeVercmp,
//!     containers: &Buildah,
//!     backend: &RpmBuildBackend,
//! };
//! Orchestrator::new(&config, tools, &ledger).build_pkg("htop")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod build;
pub mod config;
pub mod container;
pub mod deps;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod orchestrator;
pub mod pkgmgr;
pub mod preflight;
pub mod process;
pub mod repo;

pub use build::{BuildBackend, RpmBuildBackend};
pub use config::Config;
pub use container::{Buildah, ContainerTool, Workspace};
pub use error::RebuildError;
pub use ledger::BuildLedger;
pub use orchestrator::{BuildOutcome, Orchestrator, RebuildSummary, Tools};
pub use pkgmgr::{Dnf, PackageManager};
pub use repo::{Candidate, NativeVercmp, PackageResolver, VersionCompare};
