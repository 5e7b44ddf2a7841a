//! Component loading: decides, per plugin, which package managers, rules,
//! and reporters take part in a run.

use std::sync::Arc;

use smoker_types::{PackageManagerSpec, RuleConfig, RuleSeverity, SmokerOptions};
use tracing::debug;

use crate::error::SmokerError;
use crate::executor::Executor;
use crate::pkg_manager::{PkgManagerDef, PkgManagerRequest};
use crate::plugin::{Plugin, component_id};
use crate::reporter::ReporterDef;
use crate::rule::RuleDef;

/// A resolved package-manager target.
#[derive(Clone)]
pub struct LoadedPkgManager {
    pub id: String,
    /// Index of the request this target satisfies
    pub request: usize,
    pub spec: PackageManagerSpec,
    pub def: Arc<dyn PkgManagerDef>,
}

/// An enabled rule with its effective configuration.
#[derive(Clone)]
pub struct LoadedRule {
    pub id: String,
    pub config: RuleConfig,
    pub def: Arc<dyn RuleDef>,
}

/// An enabled reporter.
#[derive(Clone)]
pub struct LoadedReporter {
    pub id: String,
    pub def: Arc<dyn ReporterDef>,
}

/// The targets and rules one plugin contributes to a run.
///
/// Reporters are not part of this: listeners are started before loading so
/// they observe loading failures too. See [`ComponentLoader::reporters`].
#[derive(Clone, Default)]
pub struct LoadedComponents {
    pub pkg_managers: Vec<LoadedPkgManager>,
    pub rules: Vec<LoadedRule>,
}

impl LoadedComponents {
    pub fn extend(&mut self, other: LoadedComponents) {
        self.pkg_managers.extend(other.pkg_managers);
        self.rules.extend(other.rules);
    }
}

/// Loads the applicable components of a single plugin.
pub struct ComponentLoader<'a> {
    plugin: &'a Plugin,
    options: &'a SmokerOptions,
    executor: &'a dyn Executor,
}

impl<'a> ComponentLoader<'a> {
    pub fn new(plugin: &'a Plugin, options: &'a SmokerOptions, executor: &'a dyn Executor) -> Self {
        Self {
            plugin,
            options,
            executor,
        }
    }

    /// Resolve package managers for the requests this plugin accepts, plus
    /// the enabled rules.
    pub async fn load(
        &self,
        requests: &[PkgManagerRequest],
    ) -> Result<LoadedComponents, SmokerError> {
        Ok(LoadedComponents {
            pkg_managers: self.load_pkg_managers(requests).await?,
            rules: self.load_rules(),
        })
    }

    async fn load_pkg_managers(
        &self,
        requests: &[PkgManagerRequest],
    ) -> Result<Vec<LoadedPkgManager>, SmokerError> {
        let mut loaded = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            let Some(def) = self
                .plugin
                .pkg_managers()
                .iter()
                .find(|def| def.accepts(request))
            else {
                continue;
            };
            let spec = def.resolve(request, self.executor).await.map_err(|e| {
                SmokerError::discovery(format!(
                    "failed to resolve package manager `{request}`: {e:#}"
                ))
            })?;
            debug!(plugin = self.plugin.id(), %request, pkg_manager = %spec, "resolved package manager");
            loaded.push(LoadedPkgManager {
                id: component_id(self.plugin.id(), def.name()),
                request: index,
                spec,
                def: Arc::clone(def),
            });
        }
        Ok(loaded)
    }

    /// Rule settings are looked up by full id first, then by bare name.
    fn load_rules(&self) -> Vec<LoadedRule> {
        if !self.options.lint {
            return Vec::new();
        }
        self.plugin
            .rules()
            .iter()
            .filter_map(|def| {
                let id = component_id(self.plugin.id(), def.name());
                let config = self
                    .options
                    .rules
                    .get(&id)
                    .or_else(|| self.options.rules.get(def.name()))
                    .cloned()
                    .unwrap_or_else(|| RuleConfig {
                        severity: def.default_severity(),
                        options: serde_json::Value::Null,
                    });
                if config.severity == RuleSeverity::Off {
                    debug!(rule = %id, "rule disabled");
                    return None;
                }
                Some(LoadedRule {
                    id,
                    config,
                    def: Arc::clone(def),
                })
            })
            .collect()
    }

    /// Explicitly requested reporters win; otherwise each reporter's `when` decides.
    pub fn reporters(&self) -> Vec<LoadedReporter> {
        self.plugin
            .reporters()
            .iter()
            .filter(|def| {
                let id = component_id(self.plugin.id(), def.name());
                if self.options.reporters.is_empty() {
                    def.when(self.options)
                } else {
                    self.options
                        .reporters
                        .iter()
                        .any(|r| r == &id || r == def.name())
                }
            })
            .map(|def| LoadedReporter {
                id: component_id(self.plugin.id(), def.name()),
                def: Arc::clone(def),
            })
            .collect()
    }
}
