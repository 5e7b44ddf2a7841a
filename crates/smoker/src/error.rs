//! Error types for smoker runs

use smoker_types::{ErrorInfo, ErrorKind};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T, E = SmokerError> = std::result::Result<T, E>;

/// Errors raised while running the pipeline.
///
/// Messages are rendered eagerly so errors can be cloned into events and
/// carried across actor boundaries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmokerError {
    /// Workspace discovery or component loading failed
    #[error("{message}")]
    Discovery { message: String },

    /// A workspace could not be packed
    #[error("{pkg_manager} failed to pack {pkg_name}: {message}")]
    Pack {
        pkg_manager: String,
        pkg_name: String,
        message: String,
    },

    /// A manifest could not be installed
    #[error("{pkg_manager} failed to install {pkg_name}: {message}")]
    Install {
        pkg_manager: String,
        pkg_name: String,
        message: String,
    },

    /// A rule implementation failed
    #[error("rule {rule_id} failed on {pkg_name}: {message}")]
    Rule {
        rule_id: String,
        pkg_name: String,
        message: String,
    },

    /// Lint reported error-severity issues
    #[error("{message}")]
    Lint {
        pkg_manager: String,
        message: String,
    },

    /// A script failed or could not be run
    #[error("script `{script}` failed in {pkg_name} ({pkg_manager}): {message}")]
    Script {
        pkg_manager: String,
        pkg_name: String,
        script: String,
        message: String,
    },

    /// The abort signal was observed
    #[error("{operation} aborted")]
    Aborted { operation: String },

    /// Several errors folded together
    #[error("{} errors occurred", .0.len())]
    Aggregate(Vec<SmokerError>),

    /// Worker setup, teardown, or temp directory handling failed
    #[error("{pkg_manager}: {message}")]
    Lifecycle {
        pkg_manager: String,
        message: String,
    },

    /// Invalid options or configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

/// Render an error with its full cause chain on one line.
fn chain(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

impl SmokerError {
    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery {
            message: msg.into(),
        }
    }

    /// Create a pack error from a plugin failure
    pub fn pack(pkg_manager: &str, pkg_name: &str, err: &anyhow::Error) -> Self {
        Self::Pack {
            pkg_manager: pkg_manager.to_string(),
            pkg_name: pkg_name.to_string(),
            message: chain(err),
        }
    }

    /// Create an install error from a plugin failure
    pub fn install(pkg_manager: &str, pkg_name: &str, err: &anyhow::Error) -> Self {
        Self::Install {
            pkg_manager: pkg_manager.to_string(),
            pkg_name: pkg_name.to_string(),
            message: chain(err),
        }
    }

    /// Create a rule error
    pub fn rule(rule_id: &str, pkg_name: &str, msg: impl Into<String>) -> Self {
        Self::Rule {
            rule_id: rule_id.to_string(),
            pkg_name: pkg_name.to_string(),
            message: msg.into(),
        }
    }

    /// Create a script error
    pub fn script(pkg_manager: &str, pkg_name: &str, script: &str, msg: impl Into<String>) -> Self {
        Self::Script {
            pkg_manager: pkg_manager.to_string(),
            pkg_name: pkg_name.to_string(),
            script: script.to_string(),
            message: msg.into(),
        }
    }

    /// Create an abort error
    pub fn aborted(operation: impl Into<String>) -> Self {
        Self::Aborted {
            operation: operation.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(pkg_manager: &str, msg: impl Into<String>) -> Self {
        Self::Lifecycle {
            pkg_manager: pkg_manager.to_string(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Fold errors: none yields `None`, one is returned as-is.
    pub fn fold(mut errors: Vec<SmokerError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Classification used in events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery { .. } => ErrorKind::Discovery,
            Self::Pack { .. } => ErrorKind::Pack,
            Self::Install { .. } => ErrorKind::Install,
            Self::Rule { .. } => ErrorKind::Rule,
            Self::Lint { .. } => ErrorKind::Lint,
            Self::Script { .. } => ErrorKind::Script,
            Self::Aborted { .. } => ErrorKind::Aborted,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Serializable form for events and final output.
    pub fn to_info(&self) -> ErrorInfo {
        let (pkg_manager, pkg_name) = match self {
            Self::Pack {
                pkg_manager,
                pkg_name,
                ..
            }
            | Self::Install {
                pkg_manager,
                pkg_name,
                ..
            }
            | Self::Script {
                pkg_manager,
                pkg_name,
                ..
            } => (Some(pkg_manager.clone()), Some(pkg_name.clone())),
            Self::Rule { pkg_name, .. } => (None, Some(pkg_name.clone())),
            Self::Lint { pkg_manager, .. } | Self::Lifecycle { pkg_manager, .. } => {
                (Some(pkg_manager.clone()), None)
            }
            _ => (None, None),
        };
        let causes = match self {
            Self::Aggregate(errors) => errors.iter().map(SmokerError::to_info).collect(),
            _ => Vec::new(),
        };
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            pkg_manager,
            pkg_name,
            causes,
        }
    }
}

impl From<&SmokerError> for ErrorInfo {
    fn from(err: &SmokerError) -> Self {
        err.to_info()
    }
}

/// Fold serialized errors the same way [`SmokerError::fold`] does,
/// dropping duplicates by message first.
pub fn fold_infos(errors: Vec<ErrorInfo>) -> Option<ErrorInfo> {
    let mut unique: Vec<ErrorInfo> = Vec::with_capacity(errors.len());
    for err in errors {
        if !unique.iter().any(|e| e.message == err.message) {
            unique.push(err);
        }
    }
    match unique.len() {
        0 => None,
        1 => unique.pop(),
        n => Some(ErrorInfo {
            kind: ErrorKind::Aggregate,
            message: format!("{n} errors occurred"),
            pkg_manager: None,
            pkg_name: None,
            causes: unique,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn pack_error_keeps_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("unexpected token"))
            .context("malformed npm pack output")
            .expect_err("err");
        let e = SmokerError::pack("npm@10.2.0", "a", &err);
        assert_eq!(
            e.to_string(),
            "npm@10.2.0 failed to pack a: malformed npm pack output: unexpected token"
        );
        let info = e.to_info();
        assert_eq!(info.kind, ErrorKind::Pack);
        assert_eq!(info.pkg_manager.as_deref(), Some("npm@10.2.0"));
        assert_eq!(info.pkg_name.as_deref(), Some("a"));
    }

    #[test]
    fn fold_single_and_many() {
        assert_eq!(SmokerError::fold(Vec::new()), None);
        let one = SmokerError::aborted("pack a");
        assert_eq!(SmokerError::fold(vec![one.clone()]), Some(one.clone()));
        let many = SmokerError::fold(vec![one.clone(), SmokerError::discovery("x")])
            .expect("aggregate");
        assert_eq!(many.to_string(), "2 errors occurred");
        assert_eq!(many.to_info().causes.len(), 2);
    }

    #[test]
    fn fold_infos_dedups_by_message() {
        let a = SmokerError::aborted("pack a").to_info();
        let b = SmokerError::aborted("pack b").to_info();
        assert_eq!(fold_infos(vec![a.clone(), a.clone()]), Some(a.clone()));
        let agg = fold_infos(vec![a.clone(), b, a]).expect("aggregate");
        assert_eq!(agg.kind, ErrorKind::Aggregate);
        assert_eq!(agg.causes.len(), 2);
    }
}
