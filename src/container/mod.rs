//! Disposable build containers.
//!
//! [`ContainerTool`] is the four-operation interface the rebuilder needs from
//! a container-build tool; [`Buildah`] implements it. [`Workspace`] owns one
//! named instance and removes it when dropped, so every exit path out of a
//! build (success, error, early return, panic) tears the container down.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::process::run_checked;

/// A host directory made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

pub trait ContainerTool {
    fn instantiate(&self, name: &str, image: &str) -> Result<()>;
    fn run(&self, name: &str, mounts: &[Mount], argv: &[String]) -> Result<()>;
    fn copy_in(&self, name: &str, src: &Path, dest: &str) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct Buildah;

impl ContainerTool for Buildah {
    fn instantiate(&self, name: &str, image: &str) -> Result<()> {
        run_checked(
            Command::new("buildah")
                .args(["from", "--quiet", "--name"])
                .arg(name)
                .arg(image),
        )
        .with_context(|| format!("creating container '{name}' from '{image}'"))
    }

    fn run(&self, name: &str, mounts: &[Mount], argv: &[String]) -> Result<()> {
        let mut cmd = Command::new("buildah");
        cmd.arg("run");
        for mount in mounts {
            cmd.arg("--volume")
                .arg(format!("{}:{}:Z", mount.host.display(), mount.container));
        }
        cmd.arg(name).arg("--").args(argv);
        run_checked(&mut cmd).with_context(|| format!("running command in container '{name}'"))
    }

    fn copy_in(&self, name: &str, src: &Path, dest: &str) -> Result<()> {
        run_checked(
            Command::new("buildah")
                .args(["copy", "--quiet"])
                .arg(name)
                .arg(src)
                .arg(dest),
        )
        .with_context(|| format!("copying '{}' into container '{name}'", src.display()))
    }

    fn remove(&self, name: &str) -> Result<()> {
        run_checked(Command::new("buildah").arg("rm").arg(name))
            .with_context(|| format!("removing container '{name}'"))
    }
}

/// One container instance, removed on drop.
pub struct Workspace<'a> {
    tool: &'a dyn ContainerTool,
    name: String,
}

impl<'a> Workspace<'a> {
    /// Create the instance. The guard exists before the tool is invoked, so
    /// a half-created instance is still removed if creation fails.
    pub fn create(tool: &'a dyn ContainerTool, name: &str, image: &str) -> Result<Self> {
        let workspace = Self {
            tool,
            name: name.to_string(),
        };
        tracing::debug!(container = name, image, "creating build workspace");
        tool.instantiate(name, image)?;
        Ok(workspace)
    }

    pub fn run(&self, mounts: &[Mount], argv: &[String]) -> Result<()> {
        self.tool.run(&self.name, mounts, argv)
    }

    pub fn copy_in(&self, src: &Path, dest: &str) -> Result<()> {
        self.tool.copy_in(&self.name, src, dest)
    }
}

impl Drop for Workspace<'_> {
    fn drop(&mut self) {
        tracing::debug!(container = %self.name, "removing build workspace");
        if let Err(err) = self.tool.remove(&self.name) {
            tracing::warn!(container = %self.name, "failed to remove build workspace: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingTool {
        fail_instantiate: bool,
        calls: RefCell<Vec<String>>,
    }

    impl ContainerTool for RecordingTool {
        fn instantiate(&self, name: &str, _: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("from {name}"));
            if self.fail_instantiate {
                bail!("image pull failed");
            }
            Ok(())
        }
        fn run(&self, name: &str, _: &[Mount], argv: &[String]) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("run {name} {}", argv.join(" ")));
            Ok(())
        }
        fn copy_in(&self, name: &str, _: &Path, dest: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("copy {name} {dest}"));
            Ok(())
        }
        fn remove(&self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("rm {name}"));
            Ok(())
        }
    }

    #[test]
    fn removed_on_scope_exit() {
        let tool = RecordingTool::default();
        {
            let ws = Workspace::create(&tool, "srcbuild-bash-1", "fedora:40").unwrap();
            ws.run(&[], &["true".to_string()]).unwrap();
        }
        assert_eq!(
            *tool.calls.borrow(),
            ["from srcbuild-bash-1", "run srcbuild-bash-1 true", "rm srcbuild-bash-1"]
        );
    }

    #[test]
    fn removed_when_creation_fails() {
        let tool = RecordingTool {
            fail_instantiate: true,
            ..Default::default()
        };
        assert!(Workspace::create(&tool, "ws", "fedora:40").is_err());
        assert_eq!(*tool.calls.borrow(), ["from ws", "rm ws"]);
    }
}
