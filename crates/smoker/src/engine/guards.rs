//! Completion guards for worker lanes.
//!
//! Guards are pure functions over a [`Snapshot`] of one worker's counters.
//! They are re-evaluated after every message the worker handles and are
//! purely count-based.

/// Counters of one worker at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub workspaces: usize,
    pub additional: usize,
    /// Install manifests produced so far, additional ones included
    pub pack_produced: usize,
    pub pack_queued: usize,
    pub pack_in_flight: usize,
    /// Successful installs
    pub installed: usize,
    pub install_queued: usize,
    pub install_in_flight: usize,
    /// Successful installs of workspace-derived manifests
    pub eligible_installed: usize,
    pub lint_rules: usize,
    pub lint_prep_in_flight: usize,
    pub lint_queued: usize,
    /// Packages fanned out to the rule checkers
    pub lint_packages: usize,
    /// Check results recorded
    pub lint_checks: usize,
    pub scripts: usize,
    pub script_queued: usize,
    pub script_in_flight: usize,
    pub script_results: usize,
}

pub(crate) fn is_packing_complete(s: &Snapshot) -> bool {
    s.pack_produced == s.workspaces + s.additional && s.pack_queued == 0 && s.pack_in_flight == 0
}

pub(crate) fn is_installation_complete(s: &Snapshot) -> bool {
    is_packing_complete(s)
        && s.installed == s.pack_produced
        && s.install_queued == 0
        && s.install_in_flight == 0
}

/// Every fanned-out package has one result from every rule, and no more
/// packages can arrive.
pub(crate) fn is_linting_complete(s: &Snapshot) -> bool {
    is_installation_complete(s)
        && s.lint_prep_in_flight == 0
        && s.lint_queued == 0
        && s.lint_packages == s.eligible_installed
        && s.lint_checks == s.lint_rules * s.lint_packages
}

pub(crate) fn is_running_complete(s: &Snapshot) -> bool {
    is_installation_complete(s)
        && s.script_queued == 0
        && s.script_in_flight == 0
        && s.script_results == s.eligible_installed * s.scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn installed(workspaces: usize, additional: usize) -> Snapshot {
        Snapshot {
            workspaces,
            additional,
            pack_produced: workspaces + additional,
            installed: workspaces + additional,
            eligible_installed: workspaces,
            ..Snapshot::default()
        }
    }

    #[test]
    fn packing_waits_for_additional_manifests() {
        let mut s = Snapshot {
            workspaces: 2,
            additional: 1,
            pack_produced: 2,
            ..Snapshot::default()
        };
        assert!(!is_packing_complete(&s));
        s.pack_produced = 3;
        assert!(is_packing_complete(&s));
        s.pack_in_flight = 1;
        assert!(!is_packing_complete(&s));
    }

    #[test]
    fn installation_requires_packing() {
        let mut s = installed(2, 0);
        assert!(is_installation_complete(&s));
        s.pack_queued = 1;
        assert!(!is_installation_complete(&s));
    }

    #[test]
    fn running_with_no_scripts_completes_after_install() {
        let s = installed(3, 1);
        assert!(is_running_complete(&s));
    }

    proptest! {
        #[test]
        fn lint_complete_iff_rules_times_packages(
            w in 1usize..6,
            a in 0usize..3,
            r in 1usize..5,
            recorded in 0usize..40,
        ) {
            let s = Snapshot {
                lint_rules: r,
                lint_packages: w,
                lint_checks: recorded,
                ..installed(w, a)
            };
            prop_assert_eq!(is_linting_complete(&s), recorded == r * w);
        }

        #[test]
        fn running_complete_iff_all_pairs_reported(
            w in 1usize..6,
            scripts in 1usize..4,
            results in 0usize..30,
        ) {
            let s = Snapshot {
                scripts,
                script_results: results,
                ..installed(w, 0)
            };
            prop_assert_eq!(is_running_complete(&s), results == w * scripts);
        }

        #[test]
        fn later_guards_imply_earlier(
            w in 1usize..5,
            a in 0usize..3,
            produced in 0usize..8,
            installed_count in 0usize..8,
            queued in 0usize..2,
        ) {
            let s = Snapshot {
                workspaces: w,
                additional: a,
                pack_produced: produced,
                installed: installed_count,
                install_queued: queued,
                eligible_installed: installed_count.min(w),
                lint_packages: installed_count.min(w),
                ..Snapshot::default()
            };
            if is_installation_complete(&s) {
                prop_assert!(is_packing_complete(&s));
                prop_assert_eq!(s.installed, w + a);
            }
            if is_linting_complete(&s) || is_running_complete(&s) {
                prop_assert!(is_installation_complete(&s));
            }
        }
    }
}
