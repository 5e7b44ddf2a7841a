//! Workspace discovery.
//!
//! Reads the root `package.json`. Without a `workspaces` field the root
//! package is the only workspace. With one, its glob patterns are expanded
//! relative to the root and private packages are skipped.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use smoker_types::WorkspaceInfo;
use tracing::debug;

use crate::error::SmokerError;

/// Which workspaces to test.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selection<'a> {
    /// Every non-private workspace
    pub all: bool,
    /// Workspaces by name or path relative to the root
    pub workspaces: &'a [String],
}

fn read_pkg_json(dir: &Path) -> Result<Value, SmokerError> {
    let path = dir.join("package.json");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        SmokerError::discovery(format!("failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| SmokerError::discovery(format!("failed to parse {}: {e}", path.display())))
}

/// `workspaces` may be an array or `{ "packages": [...] }`.
fn workspace_patterns(pkg_json: &Value) -> Vec<String> {
    let field = match pkg_json.get("workspaces") {
        Some(Value::Object(obj)) => obj.get("packages"),
        other => other,
    };
    field
        .and_then(Value::as_array)
        .map(|patterns| {
            patterns
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn expand(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, SmokerError> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        pattern.trim_start_matches("./").trim_end_matches('/')
    );
    let paths = glob::glob(&full).map_err(|e| {
        SmokerError::discovery(format!("invalid workspace pattern `{pattern}`: {e}"))
    })?;
    Ok(paths
        .filter_map(Result::ok)
        .filter(|p| p.join("package.json").is_file())
        .collect())
}

/// Strip `./` and trailing separators so `./packages/a/` matches `packages/a`.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn matches_selector(root: &Path, ws: &WorkspaceInfo, selector: &str) -> bool {
    if ws.pkg_name == selector {
        return true;
    }
    let wanted = normalize(Path::new(selector));
    let wanted = if wanted.is_absolute() {
        wanted
    } else {
        normalize(&root.join(wanted))
    };
    normalize(&ws.local_path) == wanted
}

/// Find the workspaces to test under `root`.
///
/// Results are sorted by path. A selection that matches nothing is an error.
pub fn discover_workspaces(
    root: &Path,
    selection: Selection<'_>,
) -> Result<Vec<WorkspaceInfo>, SmokerError> {
    let root_json = read_pkg_json(root)?;
    let patterns = workspace_patterns(&root_json);

    if patterns.is_empty() {
        if !selection.workspaces.is_empty() {
            return Err(SmokerError::discovery(format!(
                "{} does not define any workspaces",
                root.join("package.json").display()
            )));
        }
        debug!(root = %root.display(), "no workspaces defined, using root package");
        return Ok(vec![WorkspaceInfo::new(root, root_json)]);
    }

    if !selection.all && selection.workspaces.is_empty() {
        debug!(root = %root.display(), "no workspace selection, using root package");
        return Ok(vec![WorkspaceInfo::new(root, root_json)]);
    }

    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();
    for pattern in &patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => excluded.extend(expand(root, negated)?),
            None => included.extend(expand(root, pattern)?),
        }
    }

    let mut found = Vec::new();
    for dir in included.difference(&excluded) {
        let ws = WorkspaceInfo::new(dir, read_pkg_json(dir)?);
        if ws.is_private() {
            debug!(pkg = %ws.pkg_name, "skipping private workspace");
            continue;
        }
        if ws.pkg_name.is_empty() {
            debug!(path = %dir.display(), "skipping workspace without a name");
            continue;
        }
        found.push(ws);
    }

    if selection.all {
        if found.is_empty() {
            return Err(SmokerError::discovery(
                "no public workspaces found".to_string(),
            ));
        }
        return reject_duplicate_names(found);
    }

    let unmatched: Vec<&str> = selection
        .workspaces
        .iter()
        .filter(|sel| !found.iter().any(|ws| matches_selector(root, ws, sel)))
        .map(String::as_str)
        .collect();
    if !unmatched.is_empty() {
        return Err(SmokerError::discovery(format!(
            "no workspace matches: {}",
            unmatched.join(", ")
        )));
    }

    reject_duplicate_names(
        found
            .into_iter()
            .filter(|ws| {
                selection
                    .workspaces
                    .iter()
                    .any(|sel| matches_selector(root, ws, sel))
            })
            .collect(),
    )
}

/// [`discover_workspaces`] on the blocking pool, for async callers.
pub async fn discover_workspaces_off_thread(
    root: PathBuf,
    all: bool,
    workspaces: Vec<String>,
) -> Result<Vec<WorkspaceInfo>, SmokerError> {
    tokio::task::spawn_blocking(move || {
        discover_workspaces(
            &root,
            Selection {
                all,
                workspaces: &workspaces,
            },
        )
    })
    .await
    .map_err(|e| SmokerError::discovery(format!("workspace discovery crashed: {e}")))?
}

/// Installed packages land under `node_modules/<name>`, so two selected
/// workspaces may not share a name.
fn reject_duplicate_names(found: Vec<WorkspaceInfo>) -> Result<Vec<WorkspaceInfo>, SmokerError> {
    for (i, ws) in found.iter().enumerate() {
        if let Some(other) = found[..i].iter().find(|o| o.pkg_name == ws.pkg_name) {
            return Err(SmokerError::discovery(format!(
                "duplicate package name `{}` in {} and {}",
                ws.pkg_name,
                other.local_path.display(),
                ws.local_path.display()
            )));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_pkg(dir: &Path, value: Value) {
        std::fs::create_dir_all(dir).expect("mkdir");
        std::fs::write(dir.join("package.json"), value.to_string()).expect("write");
    }

    fn monorepo() -> TempDir {
        let td = tempfile::tempdir().expect("tempdir");
        write_pkg(
            td.path(),
            json!({"name": "root", "private": true, "workspaces": ["packages/*", "!packages/ignored"]}),
        );
        write_pkg(&td.path().join("packages/b"), json!({"name": "b"}));
        write_pkg(&td.path().join("packages/a"), json!({"name": "@scope/a"}));
        write_pkg(
            &td.path().join("packages/hidden"),
            json!({"name": "hidden", "private": true}),
        );
        write_pkg(&td.path().join("packages/ignored"), json!({"name": "ignored"}));
        td
    }

    fn names(found: &[WorkspaceInfo]) -> Vec<&str> {
        found.iter().map(|w| w.pkg_name.as_str()).collect()
    }

    #[test]
    fn single_package_is_root() {
        let td = tempfile::tempdir().expect("tempdir");
        write_pkg(td.path(), json!({"name": "solo"}));
        let found = discover_workspaces(td.path(), Selection::default()).expect("discover");
        assert_eq!(names(&found), vec!["solo"]);
        assert_eq!(found[0].local_path, td.path());
    }

    #[test]
    fn all_selects_public_workspaces_sorted() {
        let td = monorepo();
        let found = discover_workspaces(
            td.path(),
            Selection {
                all: true,
                workspaces: &[],
            },
        )
        .expect("discover");
        assert_eq!(names(&found), vec!["@scope/a", "b"]);
    }

    #[test]
    fn select_by_name_or_path() {
        let td = monorepo();
        let selected = vec!["b".to_string(), "./packages/a/".to_string()];
        let found = discover_workspaces(
            td.path(),
            Selection {
                all: false,
                workspaces: &selected,
            },
        )
        .expect("discover");
        assert_eq!(names(&found), vec!["@scope/a", "b"]);
    }

    #[test]
    fn unmatched_selection_is_an_error() {
        let td = monorepo();
        let selected = vec!["b".to_string(), "hidden".to_string(), "nope".to_string()];
        let err = discover_workspaces(
            td.path(),
            Selection {
                all: false,
                workspaces: &selected,
            },
        )
        .expect_err("unmatched");
        assert_eq!(err.to_string(), "no workspace matches: hidden, nope");
    }

    #[test]
    fn workspaces_object_form() {
        let td = tempfile::tempdir().expect("tempdir");
        write_pkg(
            td.path(),
            json!({"name": "root", "workspaces": {"packages": ["libs/*"]}}),
        );
        write_pkg(&td.path().join("libs/x"), json!({"name": "x"}));
        let found = discover_workspaces(
            td.path(),
            Selection {
                all: true,
                workspaces: &[],
            },
        )
        .expect("discover");
        assert_eq!(names(&found), vec!["x"]);
    }

    #[test]
    fn missing_package_json_is_a_discovery_error() {
        let td = tempfile::tempdir().expect("tempdir");
        let err = discover_workspaces(td.path(), Selection::default()).expect_err("missing");
        assert!(matches!(err, SmokerError::Discovery { .. }));
    }

    #[test]
    fn selecting_without_workspaces_is_an_error() {
        let td = tempfile::tempdir().expect("tempdir");
        write_pkg(td.path(), json!({"name": "solo"}));
        let selected = vec!["solo".to_string()];
        assert!(
            discover_workspaces(
                td.path(),
                Selection {
                    all: false,
                    workspaces: &selected,
                },
            )
            .is_err()
        );
    }

    #[test]
    fn duplicate_package_names_are_a_discovery_error() {
        let td = monorepo();
        write_pkg(&td.path().join("packages/c"), json!({"name": "b"}));
        let err = discover_workspaces(
            td.path(),
            Selection {
                all: true,
                workspaces: &[],
            },
        )
        .expect_err("duplicate");
        assert!(matches!(err, SmokerError::Discovery { .. }));
        let msg = err.to_string();
        assert!(msg.contains("duplicate package name `b`"), "{msg}");
        assert!(msg.contains("packages/b") && msg.contains("packages/c"), "{msg}");
    }

    #[test]
    fn duplicates_outside_the_selection_are_ignored() {
        let td = monorepo();
        write_pkg(&td.path().join("packages/c"), json!({"name": "b"}));
        let selected = vec!["@scope/a".to_string()];
        let found = discover_workspaces(
            td.path(),
            Selection {
                all: false,
                workspaces: &selected,
            },
        )
        .expect("discover");
        assert_eq!(names(&found), vec!["@scope/a"]);
    }

    #[tokio::test]
    async fn off_thread_discovery_matches_the_blocking_one() {
        let td = monorepo();
        let found = discover_workspaces_off_thread(td.path().to_path_buf(), true, Vec::new())
            .await
            .expect("discover");
        assert_eq!(names(&found), vec!["@scope/a", "b"]);

        let empty = tempfile::tempdir().expect("tempdir");
        let err = discover_workspaces_off_thread(empty.path().to_path_buf(), false, Vec::new())
            .await
            .expect_err("missing");
        assert!(matches!(err, SmokerError::Discovery { .. }));
    }
}
