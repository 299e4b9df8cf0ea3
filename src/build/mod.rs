//! Compiling one source package inside a workspace.
//!
//! The orchestrator owns the workspace lifecycle; a [`BuildBackend`] only
//! drives the steps inside it. [`RpmBuildBackend`] is the rpmbuild flavour:
//!
//! 1. install the build toolchain
//! 2. copy in and unpack the source package
//! 3. install its declared build requirements
//! 4. run `rpmbuild -bb` with feature flags and compiler flags applied
//! 5. copy the produced rpms into the host output directory

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CompilerFlags;
use crate::container::{Mount, Workspace};
use crate::repo::Candidate;

/// Where rpmbuild keeps its tree inside the container.
const RPMBUILD_TOPDIR: &str = "/root/rpmbuild";
/// Container-side mount point of the host output directory.
const OUTPUT_MOUNT: &str = "/out";

/// Everything a backend needs to build one package.
#[derive(Debug, Clone, Copy)]
pub struct BuildJob<'a> {
    pub candidate: &'a Candidate,
    pub source: &'a Path,
    pub feature_flags: &'a [String],
    pub compiler_flags: &'a CompilerFlags,
    pub toolchain: &'a [String],
    /// Host directory that receives the produced packages.
    pub output_dir: &'a Path,
}

pub trait BuildBackend {
    /// Build `job` inside `workspace` and return the produced artifact paths.
    fn build(&self, workspace: &Workspace<'_>, job: &BuildJob<'_>) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Default)]
pub struct RpmBuildBackend;

impl BuildBackend for RpmBuildBackend {
    fn build(&self, workspace: &Workspace<'_>, job: &BuildJob<'_>) -> Result<Vec<PathBuf>> {
        let nvr = job.candidate.nvr();

        if !job.toolchain.is_empty() {
            let mut install = argv(&["dnf", "install", "-y", "--setopt=install_weak_deps=False"]);
            install.extend(job.toolchain.iter().cloned());
            workspace
                .run(&[], &install)
                .with_context(|| format!("installing build toolchain for '{nvr}'"))?;
        }

        let file_name = job
            .source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("source path '{}' has no file name", job.source.display()))?;
        let in_container = format!("/root/{file_name}");
        workspace
            .copy_in(job.source, &in_container)
            .with_context(|| format!("copying source package for '{nvr}'"))?;
        workspace
            .run(&[], &argv(&["rpm", "-i", in_container.as_str()]))
            .with_context(|| format!("unpacking source package for '{nvr}'"))?;

        workspace
            .run(
                &[],
                &argv(&[
                    "sh",
                    "-c",
                    format!("dnf builddep -y {RPMBUILD_TOPDIR}/SPECS/*.spec").as_str(),
                ]),
            )
            .with_context(|| format!("installing build requirements for '{nvr}'"))?;

        workspace
            .run(&[], &rpmbuild_argv(job.feature_flags, job.compiler_flags))
            .with_context(|| format!("rpmbuild failed for '{nvr}'"))?;

        let mount = Mount {
            host: job.output_dir.to_path_buf(),
            container: OUTPUT_MOUNT.to_string(),
        };
        workspace
            .run(
                &[mount],
                &argv(&[
                    "sh",
                    "-c",
                    format!("cp {RPMBUILD_TOPDIR}/RPMS/*/*.rpm {OUTPUT_MOUNT}/").as_str(),
                ]),
            )
            .with_context(|| format!("collecting built packages for '{nvr}'"))?;

        let artifacts = list_artifacts(job.output_dir)?;
        if artifacts.is_empty() {
            bail!(
                "build of '{nvr}' produced no packages in '{}'",
                job.output_dir.display()
            );
        }
        Ok(artifacts)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// `--with`/`--without` options for feature flags; a leading `-` disables.
pub fn rpmbuild_conditionals(flags: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(flags.len() * 2);
    for flag in flags {
        let (option, name) = match flag.strip_prefix('-') {
            Some(name) => ("--without", name),
            None => ("--with", flag.strip_prefix('+').unwrap_or(flag)),
        };
        if name.is_empty() {
            continue;
        }
        out.push(option.to_string());
        out.push(name.to_string());
    }
    out
}

/// Full command line for the rpmbuild step: compiler flags go in through
/// `env`, and `MAKEOPTS` also becomes rpm's `_smp_mflags`.
pub fn rpmbuild_argv(feature_flags: &[String], compiler_flags: &CompilerFlags) -> Vec<String> {
    let mut cmd = vec!["env".to_string()];
    cmd.extend(compiler_flags.iter().map(|(k, v)| format!("{k}={v}")));
    cmd.extend(argv(&[
        "sh",
        "-c",
        format!("exec rpmbuild \"$@\" {RPMBUILD_TOPDIR}/SPECS/*.spec").as_str(),
        "rpmbuild",
        "-bb",
    ]));
    if let Some(makeopts) = compiler_flags.get("MAKEOPTS") {
        cmd.push("--define".to_string());
        cmd.push(format!("_smp_mflags {makeopts}"));
    }
    cmd.extend(rpmbuild_conditionals(feature_flags));
    cmd
}

fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading output directory '{}'", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "rpm") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
