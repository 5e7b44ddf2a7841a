//! # Smoker
//!
//! Smoke-test npm packages the way their consumers see them.
//!
//! Smoker packs each workspace the way a registry would, installs the
//! tarballs into a throwaway project, then lints the installed result and
//! runs scripts against it, once per package manager.
//!
//! ## Pipeline
//!
//! Every package-manager target runs **pack → install → {lint, scripts}**:
//!
//! 1. **Pack**: every workspace is packed in parallel.
//! 2. **Install**: tarballs and any additional dependencies are installed
//!    one at a time, in order.
//! 3. **Lint**: each installed workspace is checked by every enabled rule.
//! 4. **Scripts**: each requested script runs in every installed workspace.
//!
//! Targets run concurrently and a failure in one never cancels another.
//! Progress is reported as an ordered stream of [`SmokerEvent`]s that
//! reporters consume.
//!
//! ## Example
//!
//! ```ignore
//! use smoker::{PluginRegistry, Smoker};
//! use smoker_types::SmokerOptions;
//!
//! let options = SmokerOptions {
//!     pkg_managers: vec!["npm".into(), "npm@9.8.1".into()],
//!     scripts: vec!["smoke".into()],
//!     ..SmokerOptions::default()
//! };
//! let outcome = Smoker::new(options, PluginRegistry::with_builtins())
//!     .run()
//!     .await?;
//! println!("ok: {}", outcome.ok);
//! ```
//!
//! ## Modules
//!
//! - [`plugin`]: plugins and the registry that names their components
//! - [`pkg_manager`]: the package-manager backend trait
//! - [`rule`]: the lint rule trait
//! - [`reporter`]: the reporter traits
//! - [`discovery`]: workspace discovery from `package.json`
//! - [`loader`]: per-plugin component selection
//! - [`builtin`]: the npm backend, built-in rules, and built-in reporters
//!
//! [`SmokerEvent`]: smoker_types::SmokerEvent

/// Built-in plugin: npm, rules, and reporters.
pub mod builtin;

/// Workspace discovery.
pub mod discovery;

mod engine;

/// Error types.
pub mod error;

/// Running package-manager executables.
pub mod executor;

/// Component selection per plugin.
pub mod loader;

/// Package-manager backends.
pub mod pkg_manager;

/// Plugins and the component registry.
pub mod plugin;

/// Reporters.
pub mod reporter;

/// Lint rules.
pub mod rule;

pub use engine::{RunHandle, Smoker, StopHandle};
pub use error::{Result, SmokerError};
pub use executor::{Executor, SystemExecutor};
pub use pkg_manager::{PkgManagerContext, PkgManagerDef, PkgManagerRequest};
pub use plugin::{ComponentInfo, ComponentKind, Plugin, PluginRegistry};
pub use reporter::{Reporter, ReporterContext, ReporterDef};
pub use rule::{RuleContext, RuleDef};

/// In-memory plugins for driving the engine in tests.
#[cfg(test)]
mod test_support;


/// Property-based tests for engine invariants.
#[cfg(test)]
mod property_tests;
