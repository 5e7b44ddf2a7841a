//! Rule checker actor: runs one rule against installed packages on request.

use std::sync::Arc;

use smoker_types::{LintManifest, RuleResult};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use super::message::JobReply;
use crate::error::SmokerError;
use crate::loader::LoadedRule;
use crate::rule::RuleContext;

/// Sending side of a rule checker.
#[derive(Debug, Clone)]
pub(crate) struct RuleCheckerHandle {
    pub rule_id: String,
    tx: UnboundedSender<Arc<LintManifest>>,
}

impl RuleCheckerHandle {
    /// Request a check. Returns `false` if the checker is gone.
    pub fn check(&self, manifest: Arc<LintManifest>) -> bool {
        self.tx.send(manifest).is_ok()
    }
}

/// Spawn a checker that replies into a worker's job channel.
///
/// The checker lives until every handle to it is dropped.
pub(crate) fn spawn_rule_checker(
    rule: LoadedRule,
    replies: UnboundedSender<JobReply>,
) -> RuleCheckerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RuleCheckerHandle {
        rule_id: rule.id.clone(),
        tx,
    };
    tokio::spawn(run(Arc::new(rule), rx, replies));
    handle
}

async fn run(
    rule: Arc<LoadedRule>,
    mut rx: UnboundedReceiver<Arc<LintManifest>>,
    replies: UnboundedSender<JobReply>,
) {
    while let Some(manifest) = rx.recv().await {
        let rule = Arc::clone(&rule);
        let replies = replies.clone();
        tokio::spawn(async move {
            let result = check(&rule, &manifest).await;
            let _ = replies.send(JobReply::Checked {
                install_path: manifest.install_path.clone(),
                result,
            });
        });
    }
    debug!(rule = %rule.id, "rule checker stopped");
}

/// Run one rule against one package on the blocking pool.
///
/// Errors and panics become [`RuleResult::Errored`].
pub(crate) async fn check(rule: &LoadedRule, manifest: &LintManifest) -> RuleResult {
    let def = Arc::clone(&rule.def);
    let options = rule.config.options.clone();
    let mut ctx = RuleContext::new(rule.id.clone(), manifest, rule.config.severity);

    let joined = tokio::task::spawn_blocking(move || {
        let res = def.check(&mut ctx, &options);
        (ctx, res)
    })
    .await;

    let rule_id = rule.id.clone();
    match joined {
        Ok((ctx, Ok(()))) => {
            let issues = ctx.into_issues();
            trace!(rule = %rule_id, pkg = %manifest.pkg_name, issues = issues.len(), "rule checked");
            if issues.is_empty() {
                RuleResult::Ok { rule_id }
            } else {
                RuleResult::Failed { rule_id, issues }
            }
        }
        Ok((_, Err(e))) => RuleResult::Errored {
            error: SmokerError::rule(&rule_id, &manifest.pkg_name, format!("{e:#}")).to_info(),
            rule_id,
        },
        Err(join_err) => {
            let message = if join_err.is_panic() {
                let payload = join_err.into_panic();
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("panicked: {detail}")
            } else {
                "cancelled".to_string()
            };
            RuleResult::Errored {
                error: SmokerError::rule(&rule_id, &manifest.pkg_name, message).to_info(),
                rule_id,
            }
        }
    }
}
