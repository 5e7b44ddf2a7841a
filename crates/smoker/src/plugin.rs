//! Plugins and the registry that identifies their components.
//!
//! Every component gets a stable id `<plugin-id>/<component-name>` when its
//! plugin is registered. All lookups go through those ids.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SmokerError;
use crate::pkg_manager::PkgManagerDef;
use crate::reporter::ReporterDef;
use crate::rule::RuleDef;

/// Build a component id.
pub fn component_id(plugin_id: &str, name: &str) -> String {
    format!("{plugin_id}/{name}")
}

/// A named bundle of package managers, rules, and reporters.
#[derive(Clone, Default)]
pub struct Plugin {
    id: String,
    description: String,
    pkg_managers: Vec<Arc<dyn PkgManagerDef>>,
    rules: Vec<Arc<dyn RuleDef>>,
    reporters: Vec<Arc<dyn ReporterDef>>,
}

impl Plugin {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_pkg_manager(mut self, def: impl PkgManagerDef + 'static) -> Self {
        self.pkg_managers.push(Arc::new(def));
        self
    }

    pub fn with_rule(mut self, def: impl RuleDef + 'static) -> Self {
        self.rules.push(Arc::new(def));
        self
    }

    pub fn with_reporter(mut self, def: impl ReporterDef + 'static) -> Self {
        self.reporters.push(Arc::new(def));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn pkg_managers(&self) -> &[Arc<dyn PkgManagerDef>] {
        &self.pkg_managers
    }

    pub fn rules(&self) -> &[Arc<dyn RuleDef>] {
        &self.rules
    }

    pub fn reporters(&self) -> &[Arc<dyn ReporterDef>] {
        &self.reporters
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("pkg_managers", &self.pkg_managers.len())
            .field("rules", &self.rules.len())
            .field("reporters", &self.reporters.len())
            .finish()
    }
}

/// Kinds of component a plugin can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentKind {
    PkgManager,
    Rule,
    Reporter,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentKind::PkgManager => "package manager",
            ComponentKind::Rule => "rule",
            ComponentKind::Reporter => "reporter",
        })
    }
}

/// One registered component, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub id: String,
    pub kind: ComponentKind,
    pub plugin_id: String,
    pub name: String,
    pub description: String,
}

/// Registered plugins, in registration order.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<Plugin>>,
    components: BTreeMap<(ComponentKind, String), ComponentInfo>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // The built-in plugin has unique ids and names.
        let _ = registry.register(crate::builtin::plugin());
        registry
    }

    /// Register a plugin, assigning ids to its components.
    ///
    /// Fails on a duplicate plugin id or a duplicate component name within
    /// one plugin.
    pub fn register(&mut self, plugin: Plugin) -> Result<(), SmokerError> {
        if plugin.id().is_empty() || plugin.id().contains('/') {
            return Err(SmokerError::discovery(format!(
                "invalid plugin id `{}`",
                plugin.id()
            )));
        }
        if self.plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(SmokerError::discovery(format!(
                "plugin `{}` is already registered",
                plugin.id()
            )));
        }

        let mut entries = Vec::new();
        let named = plugin
            .pkg_managers()
            .iter()
            .map(|d| (ComponentKind::PkgManager, d.name(), d.description()))
            .chain(
                plugin
                    .rules()
                    .iter()
                    .map(|d| (ComponentKind::Rule, d.name(), d.description())),
            )
            .chain(
                plugin
                    .reporters()
                    .iter()
                    .map(|d| (ComponentKind::Reporter, d.name(), d.description())),
            );
        for (kind, name, description) in named {
            let id = component_id(plugin.id(), name);
            let key = (kind, id.clone());
            if self.components.contains_key(&key) || entries.iter().any(|(k, _)| k == &key) {
                return Err(SmokerError::discovery(format!(
                    "duplicate {kind} `{id}`"
                )));
            }
            entries.push((
                key,
                ComponentInfo {
                    id,
                    kind,
                    plugin_id: plugin.id().to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                },
            ));
        }

        self.components.extend(entries);
        self.plugins.push(Arc::new(plugin));
        Ok(())
    }

    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    pub fn plugin(&self, id: &str) -> Option<&Arc<Plugin>> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    /// Components of one kind, sorted by id.
    pub fn components(&self, kind: ComponentKind) -> Vec<&ComponentInfo> {
        self.components
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, info)| info)
            .collect()
    }

    /// Look up a component by full id, or by bare name when unambiguous.
    pub fn find(&self, kind: ComponentKind, id_or_name: &str) -> Option<&ComponentInfo> {
        if let Some(info) = self.components.get(&(kind, id_or_name.to_string())) {
            return Some(info);
        }
        let mut by_name = self
            .components(kind)
            .into_iter()
            .filter(|info| info.name == id_or_name);
        match (by_name.next(), by_name.next()) {
            (Some(info), None) => Some(info),
            _ => None,
        }
    }

    pub fn rule(&self, id: &str) -> Option<Arc<dyn RuleDef>> {
        let (plugin_id, name) = id.split_once('/')?;
        self.plugin(plugin_id)?
            .rules()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    pub fn reporter(&self, id: &str) -> Option<Arc<dyn ReporterDef>> {
        let (plugin_id, name) = id.split_once('/')?;
        self.plugin(plugin_id)?
            .reporters()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }
}
