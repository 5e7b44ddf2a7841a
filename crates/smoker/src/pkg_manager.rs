//! Package-manager definitions supplied by plugins.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smoker_process::RunOptions;
use smoker_types::{
    InstallManifest, InstallResult, PackageManagerSpec, RunScriptManifest, RunScriptResult,
    WorkspaceInfo,
};
use tokio_util::sync::CancellationToken;

use crate::error::SmokerError;
use crate::executor::Executor;

/// A user request for a package manager: `npm` or `npm@9.8.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgManagerRequest {
    pub name: String,
    pub version: Option<String>,
}

impl PkgManagerRequest {
    /// Parse `name` or `name@version`.
    pub fn parse(input: &str) -> Result<Self, SmokerError> {
        let input = input.trim();
        let (name, version) = match input.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (input, None),
        };
        if name.is_empty() {
            return Err(SmokerError::config(format!(
                "invalid package manager `{input}`"
            )));
        }
        if version.is_some_and(str::is_empty) {
            return Err(SmokerError::config(format!(
                "missing version in package manager `{input}`"
            )));
        }
        Ok(Self {
            name: name.to_ascii_lowercase(),
            version: version.map(str::to_string),
        })
    }
}

impl FromStr for PkgManagerRequest {
    type Err = SmokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PkgManagerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// Everything a package-manager operation gets to work with.
///
/// One context exists per worker; the temp directory is exclusive to it.
#[derive(Clone)]
pub struct PkgManagerContext {
    pub spec: PackageManagerSpec,
    pub tmpdir: PathBuf,
    pub executor: Arc<dyn Executor>,
    pub workspaces: Arc<[WorkspaceInfo]>,
    pub signal: CancellationToken,
    pub timeout: Option<Duration>,
    pub verbose: bool,
}

impl PkgManagerContext {
    /// Process options for a command run in `cwd`, carrying the abort token and deadline.
    pub fn run_options(&self, cwd: &Path) -> RunOptions {
        RunOptions::in_dir(cwd)
            .with_signal(self.signal.clone())
            .with_timeout(self.timeout)
    }

    /// Directory packed tarballs are written to.
    pub fn pack_dir(&self) -> PathBuf {
        self.tmpdir.join("packs")
    }
}

impl fmt::Debug for PkgManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkgManagerContext")
            .field("spec", &self.spec)
            .field("tmpdir", &self.tmpdir)
            .field("workspaces", &self.workspaces.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A package-manager backend.
#[async_trait]
pub trait PkgManagerDef: Send + Sync {
    /// Name requests are matched against, e.g. `npm`.
    fn name(&self) -> &str;

    /// Executable name for system installs.
    fn bin(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str {
        ""
    }

    /// Whether this definition can serve `request`.
    fn accepts(&self, request: &PkgManagerRequest) -> bool {
        request.name == self.name()
    }

    /// Resolve an accepted request to a concrete target.
    ///
    /// Without a version the system executable is used; with one, that exact
    /// version is managed.
    async fn resolve(
        &self,
        request: &PkgManagerRequest,
        executor: &dyn Executor,
    ) -> anyhow::Result<PackageManagerSpec> {
        let mut spec = match &request.version {
            Some(version) => PackageManagerSpec::managed(self.name(), version.clone()),
            None => {
                let version = executor.system_version(self.bin()).await?;
                PackageManagerSpec::system(self.name(), version)
            }
        };
        spec.bin = self.bin().to_string();
        Ok(spec)
    }

    async fn setup(&self, _ctx: &PkgManagerContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &PkgManagerContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pack one workspace into a tarball inside the context's temp directory.
    async fn pack(
        &self,
        ctx: &PkgManagerContext,
        workspace: &WorkspaceInfo,
    ) -> anyhow::Result<InstallManifest>;

    /// Install one manifest into the context's temp directory.
    async fn install(
        &self,
        ctx: &PkgManagerContext,
        manifest: &InstallManifest,
    ) -> anyhow::Result<InstallResult>;

    /// Run one script inside an installed package.
    ///
    /// Script failures are reported through the returned result; `Err` is for
    /// failures to run at all.
    async fn run_script(
        &self,
        ctx: &PkgManagerContext,
        manifest: &RunScriptManifest,
    ) -> anyhow::Result<RunScriptResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requests() {
        assert_eq!(
            PkgManagerRequest::parse("npm").expect("parse"),
            PkgManagerRequest {
                name: "npm".into(),
                version: None
            }
        );
        let req: PkgManagerRequest = "NPM@9.8.1".parse().expect("parse");
        assert_eq!(req.name, "npm");
        assert_eq!(req.version.as_deref(), Some("9.8.1"));
        assert_eq!(req.to_string(), "npm@9.8.1");
    }

    #[test]
    fn reject_malformed_requests() {
        assert!(PkgManagerRequest::parse("").is_err());
        assert!(PkgManagerRequest::parse("@9").is_err());
        assert!(PkgManagerRequest::parse("npm@").is_err());
    }
}
