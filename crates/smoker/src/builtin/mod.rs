//! The `smoker` plugin: the npm backend, the built-in rules, and the
//! built-in reporters.

mod npm;
pub mod reporters;
pub mod rules;

use crate::plugin::Plugin;

pub use npm::Npm;

/// Id of the built-in plugin.
pub const PLUGIN_ID: &str = "smoker";

/// Build the built-in plugin.
pub fn plugin() -> Plugin {
    Plugin::new(PLUGIN_ID)
        .with_description("built-in package manager, rules, and reporters")
        .with_pkg_manager(Npm)
        .with_rule(rules::NoBannedFiles)
        .with_rule(rules::NoMissingEntryPoint)
        .with_rule(rules::NoMissingExports)
        .with_rule(rules::NoMissingPkgFiles)
        .with_reporter(reporters::ConsoleReporterDef)
        .with_reporter(reporters::JsonReporterDef)
        .with_reporter(reporters::EventLogReporterDef)
}
