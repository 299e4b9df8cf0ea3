//! Preflight checks run before any resolution starts.
//!
//! Rebuilding provisions containers and queries system repositories, so the
//! process needs root and a handful of host tools.
//!
//! # Example
//!
//! ```rust,no_run
//! use source_rebuilder::preflight::{check_host_tools, require_root};
//!
//! require_root()?;
//! check_host_tools()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{bail, Result};

use crate::error::RebuildError;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools the rebuilder shells out to.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("dnf", "dnf"),
    ("rpm", "rpm"),
    ("buildah", "buildah"),
];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check every tool in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

/// Fail with [`RebuildError::PrivilegeRequired`] unless running as root.
pub fn require_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(RebuildError::PrivilegeRequired { euid }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        // 'sh' should exist on any Unix system
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "bash"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(err.to_string().contains("fake-package"));
    }

    #[test]
    fn test_require_root_matches_euid() {
        let euid = unsafe { libc::geteuid() };
        let result = require_root();
        if euid == 0 {
            assert!(result.is_ok());
        } else {
            assert!(matches!(
                result.unwrap_err().downcast_ref::<RebuildError>(),
                Some(RebuildError::PrivilegeRequired { .. })
            ));
        }
    }
}
