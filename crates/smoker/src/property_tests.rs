//! Property-based tests for engine invariants.
//!
//! These drive whole runs over generated shapes and check that:
//! - Every (workspace, target) pair is packed exactly once
//! - Every (manifest, target) pair is installed exactly once
//! - Every installed workspace gets one result per rule, additional deps none
//! - Every installed workspace runs every script
//! - The run ends with exactly one terminal event, right after `BeforeExit`

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use proptest::prelude::*;
    use smoker_types::{SmokerEvent, Stage, StageEventKind};

    use crate::pkg_manager::PkgManagerRequest;
    use crate::test_support::{
        FakePm, Harness, RuleBehavior, ScriptedRule, count, monorepo, options,
    };

    const TARGETS: [&str; 3] = ["fake", "fake@2.0.0", "fake@3.1.4"];
    const RULES: [&str; 3] = ["alpha", "beta", "gamma"];
    const SCRIPTS: [&str; 2] = ["test", "smoke"];

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn stage_total(events: &[SmokerEvent], stage: Stage) -> Option<usize> {
        events.iter().find_map(|e| match e {
            SmokerEvent::Stage(se) if se.stage == stage => match se.kind {
                StageEventKind::Begin { total, .. } => Some(total),
                _ => None,
            },
            _ => None,
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        /// Property: item counts match the pipeline shape
        #[test]
        fn pipeline_counts_match_shape(
            workspaces in 1usize..=3,
            targets in 1usize..=3,
            additional in 0usize..=2,
            rules in 0usize..=3,
            scripts in 0usize..=2,
        ) {
            let names: Vec<String> = (0..workspaces).map(|i| format!("pkg-{i}")).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let repo = monorepo(&name_refs);

            let mut opts = options(repo.path(), &TARGETS[..targets]);
            opts.lint = true;
            opts.add = (0..additional).map(|i| format!("dep-{i}@1.0.0")).collect();
            opts.scripts = SCRIPTS[..scripts].iter().map(|s| s.to_string()).collect();

            let pm = FakePm::new();
            let counters = pm.counters.clone();
            let mut harness = Harness::new(pm);
            for name in &RULES[..rules] {
                harness = harness.with_rule(ScriptedRule::new(*name, RuleBehavior::Pass));
            }

            let (outcome, events) = runtime().block_on(harness.run(opts));
            prop_assert!(outcome.ok, "{:?}", outcome.error);

            let w = workspaces;
            let t = targets;
            prop_assert_eq!(counters.packs.load(Ordering::SeqCst), w * t);
            prop_assert_eq!(counters.installs.load(Ordering::SeqCst), (w + additional) * t);
            prop_assert_eq!(counters.scripts.load(Ordering::SeqCst), w * scripts * t);

            prop_assert_eq!(count(&events, "Pack.ItemOk"), w * t);
            prop_assert_eq!(count(&events, "Install.ItemOk"), (w + additional) * t);
            prop_assert_eq!(stage_total(&events, Stage::Pack), Some(w * t));
            prop_assert_eq!(stage_total(&events, Stage::Install), Some((w + additional) * t));

            if rules == 0 {
                prop_assert_eq!(outcome.lint_results, None);
                prop_assert_eq!(stage_total(&events, Stage::Lint), None);
            } else {
                let lint = outcome.lint_results.expect("lint results");
                prop_assert_eq!(lint.len(), w * t);
                prop_assert!(lint.iter().all(|r| r.results.len() == rules));
                prop_assert!(lint.iter().all(|r| !r.pkg_name.starts_with("dep-")));
                prop_assert_eq!(stage_total(&events, Stage::Lint), Some(w * t));
            }

            if scripts == 0 {
                prop_assert_eq!(outcome.script_results, None);
            } else {
                let results = outcome.script_results.expect("script results");
                prop_assert_eq!(results.len(), w * scripts * t);
                prop_assert_eq!(count(&events, "Script.ItemOk"), w * scripts * t);
            }

            let last = events.len() - 1;
            prop_assert_eq!(events[last].name(), "RunOk");
            prop_assert_eq!(events[last - 1].name(), "BeforeExit");
            prop_assert_eq!(count(&events, "RunOk") + count(&events, "RunFailed"), 1);
        }

        /// Property: requests print back the way they parse
        #[test]
        fn request_display_roundtrips(
            name in "[a-z][a-z0-9-]{0,10}",
            version in proptest::option::of("[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}"),
        ) {
            let raw = match &version {
                Some(v) => format!("{name}@{v}"),
                None => name.clone(),
            };
            let request = PkgManagerRequest::parse(&raw).expect("valid request");
            prop_assert_eq!(&request.name, &name);
            prop_assert_eq!(&request.version, &version);
            prop_assert_eq!(request.to_string(), raw);
        }
    }
}
