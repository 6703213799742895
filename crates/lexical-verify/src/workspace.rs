//! Project workspaces and the scoped working-directory switch.
//!
//! The process working directory is global state. [`WorkspaceContext`] only
//! changes it through a [`WorkspaceGuard`], which restores the previous
//! directory when dropped, including during unwinding. A process-wide slot
//! tracks which workspace is held so two different workspaces are never
//! entered at the same time.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, const_mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureSet;

/// An independently buildable project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Short name used in step ids and summaries.
    pub name: String,
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Features enabled for the lint run in this workspace.
    pub lint_features: FeatureSet,
}

impl Workspace {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, lint_features: FeatureSet) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            lint_features,
        }
    }
}

/// The fixed workspace list: the primary library first, then the auxiliary
/// assembly, size and benchmark workspaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSet {
    primary: Workspace,
    auxiliary: Vec<Workspace>,
}

impl WorkspaceSet {
    #[must_use]
    pub fn new(primary: Workspace, auxiliary: Vec<Workspace>) -> Self {
        Self { primary, auxiliary }
    }

    /// Workspaces of the lexical repository.
    #[must_use]
    pub fn lexical() -> Self {
        Self {
            primary: Workspace::new(
                "lexical",
                ".",
                FeatureSet::from_names(["format", "lint", "radix"]),
            ),
            auxiliary: vec![
                Workspace::new("lexical-asm", "lexical-asm", FeatureSet::empty()),
                Workspace::new("lexical-size", "lexical-size", FeatureSet::empty()),
                Workspace::new(
                    "lexical-benchmark",
                    "lexical-benchmark",
                    FeatureSet::from_names(["format", "radix"]),
                ),
            ],
        }
    }

    #[must_use]
    pub fn primary(&self) -> &Workspace {
        &self.primary
    }

    #[must_use]
    pub fn auxiliary(&self) -> &[Workspace] {
        &self.auxiliary
    }

    /// Primary first, then auxiliaries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Workspace> {
        std::iter::once(&self.primary).chain(self.auxiliary.iter())
    }
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("project root {path} is not usable: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("workspace '{workspace}' directory {path} does not exist: {source}")]
    Missing {
        workspace: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("workspace '{workspace}' path {path} is not a directory")]
    NotADirectory { workspace: String, path: PathBuf },
    #[error("cannot enter workspace '{workspace}' at {path}: {source}")]
    NotEnterable {
        workspace: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot enter workspace '{requested}' while workspace '{held}' is active")]
    Conflict { requested: String, held: String },
}

struct ActiveWorkspace {
    name: String,
    dir: PathBuf,
    previous: PathBuf,
    depth: usize,
}

static ACTIVE: Mutex<Option<ActiveWorkspace>> = const_mutex(None);

/// Name of the workspace currently held in this process, if any.
#[must_use]
pub fn active_workspace() -> Option<String> {
    ACTIVE.lock().as_ref().map(|active| active.name.clone())
}

/// Resolves workspaces against a canonical project root.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    root: PathBuf,
}

impl WorkspaceContext {
    /// Anchor workspace resolution at `root`. The root is canonicalized so
    /// that resolution does not depend on the directory held later.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|source| WorkspaceError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root: canonical })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory of `workspace` under this root.
    #[must_use]
    pub fn resolve(&self, workspace: &Workspace) -> PathBuf {
        self.root.join(&workspace.path)
    }

    /// Run `action` with the working directory switched into `workspace`.
    ///
    /// The previous directory is restored on every exit path.
    pub fn with_workspace<T>(
        &self,
        workspace: &Workspace,
        action: impl FnOnce() -> T,
    ) -> Result<T, WorkspaceError> {
        let _guard = self.enter(workspace)?;
        Ok(action())
    }

    /// Switch into `workspace` and return the guard that switches back.
    pub fn enter(&self, workspace: &Workspace) -> Result<WorkspaceGuard, WorkspaceError> {
        let target = self.resolve(workspace);
        let dir = target
            .canonicalize()
            .map_err(|source| WorkspaceError::Missing {
                workspace: workspace.name.clone(),
                path: target.clone(),
                source,
            })?;
        if !dir.is_dir() {
            return Err(WorkspaceError::NotADirectory {
                workspace: workspace.name.clone(),
                path: dir,
            });
        }

        let mut slot = ACTIVE.lock();
        if let Some(active) = slot.as_mut() {
            if active.dir == dir {
                active.depth += 1;
                return Ok(WorkspaceGuard { _private: () });
            }
            return Err(WorkspaceError::Conflict {
                requested: workspace.name.clone(),
                held: active.name.clone(),
            });
        }

        let not_enterable = |source| WorkspaceError::NotEnterable {
            workspace: workspace.name.clone(),
            path: dir.clone(),
            source,
        };
        let previous = std::env::current_dir().map_err(not_enterable)?;
        std::env::set_current_dir(&dir).map_err(not_enterable)?;
        *slot = Some(ActiveWorkspace {
            name: workspace.name.clone(),
            dir,
            previous,
            depth: 1,
        });
        Ok(WorkspaceGuard { _private: () })
    }
}

/// Holds a workspace; restores the previous working directory on drop.
#[must_use = "dropping the guard immediately leaves the workspace"]
pub struct WorkspaceGuard {
    _private: (),
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let mut slot = ACTIVE.lock();
        let Some(active) = slot.as_mut() else {
            return;
        };
        active.depth -= 1;
        if active.depth > 0 {
            return;
        }
        if let Some(active) = slot.take()
            && let Err(err) = std::env::set_current_dir(&active.previous)
        {
            eprintln!(
                "warning: failed to restore working directory {} after workspace '{}': {err}",
                active.previous.display(),
                active.name
            );
        }
    }
}

/// Serializes tests that touch the process working directory.
#[cfg(test)]
pub(crate) fn cwd_test_lock() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = const_mutex(());
    LOCK.lock()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{Workspace, WorkspaceSet};
    use crate::features::FeatureSet;

    pub(crate) fn unique_tmp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    /// A temp project root with every lexical workspace directory created.
    pub(crate) fn lexical_tree(prefix: &str) -> PathBuf {
        let root = unique_tmp_dir(prefix);
        for ws in WorkspaceSet::lexical().auxiliary() {
            std::fs::create_dir_all(root.join(&ws.path)).expect("create workspace dir");
        }
        root
    }

    pub(crate) fn workspace(name: &str) -> Workspace {
        Workspace::new(name, name, FeatureSet::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{unique_tmp_dir, workspace};
    use super::*;

    #[test]
    fn lexical_workspaces_primary_first() {
        let set = WorkspaceSet::lexical();
        let names: Vec<&str> = set.iter().map(|ws| ws.name.as_str()).collect();
        assert_eq!(
            names,
            ["lexical", "lexical-asm", "lexical-size", "lexical-benchmark"]
        );
        assert_eq!(set.primary().path, PathBuf::from("."));
        assert!(set.primary().lint_features.contains("lint"));
    }

    #[test]
    fn restores_directory_after_success() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-success");
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        let ctx = WorkspaceContext::new(&root).unwrap();
        let before = std::env::current_dir().unwrap();

        let inside = ctx
            .with_workspace(&workspace("alpha"), || std::env::current_dir().unwrap())
            .unwrap();
        assert_eq!(inside, root.join("alpha").canonicalize().unwrap());
        assert_eq!(std::env::current_dir().unwrap(), before);
        assert!(active_workspace().is_none());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn restores_directory_after_failing_action() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-failure");
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        let ctx = WorkspaceContext::new(&root).unwrap();
        let before = std::env::current_dir().unwrap();

        let outcome: Result<(), String> = ctx
            .with_workspace(&workspace("alpha"), || Err(String::from("tool failed")))
            .unwrap();
        assert!(outcome.is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn restores_directory_after_panic() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-panic");
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        let ctx = WorkspaceContext::new(&root).unwrap();
        let before = std::env::current_dir().unwrap();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.with_workspace::<()>(&workspace("alpha"), || panic!("boom"))
        }));
        assert!(caught.is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);
        assert!(active_workspace().is_none());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn missing_workspace_is_reported_without_switching() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-missing");
        let ctx = WorkspaceContext::new(&root).unwrap();
        let before = std::env::current_dir().unwrap();

        let err = ctx
            .with_workspace(&workspace("nope"), || ())
            .expect_err("missing workspace must fail");
        assert!(matches!(err, WorkspaceError::Missing { .. }));
        assert_eq!(std::env::current_dir().unwrap(), before);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn file_is_not_a_workspace() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-file");
        std::fs::write(root.join("plain"), "x").unwrap();
        let ctx = WorkspaceContext::new(&root).unwrap();

        let err = ctx.with_workspace(&workspace("plain"), || ()).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotADirectory { .. }));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn same_workspace_nests_and_different_conflicts() {
        let _lock = cwd_test_lock();
        let root = unique_tmp_dir("ws-nesting");
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        std::fs::create_dir_all(root.join("beta")).unwrap();
        let ctx = WorkspaceContext::new(&root).unwrap();
        let before = std::env::current_dir().unwrap();
        let alpha_dir = root.join("alpha").canonicalize().unwrap();

        ctx.with_workspace(&workspace("alpha"), || {
            let nested = ctx
                .with_workspace(&workspace("alpha"), || std::env::current_dir().unwrap())
                .unwrap();
            assert_eq!(nested, alpha_dir);
            // Leaving the nested scope keeps the outer one.
            assert_eq!(std::env::current_dir().unwrap(), alpha_dir);
            assert_eq!(active_workspace().as_deref(), Some("alpha"));

            let err = ctx.with_workspace(&workspace("beta"), || ()).unwrap_err();
            assert!(matches!(err, WorkspaceError::Conflict { .. }));
        })
        .unwrap();

        assert_eq!(std::env::current_dir().unwrap(), before);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn missing_root_is_rejected() {
        let root = unique_tmp_dir("ws-root").join("absent");
        let err = WorkspaceContext::new(&root).unwrap_err();
        assert!(matches!(err, WorkspaceError::Root { .. }));
    }
}
