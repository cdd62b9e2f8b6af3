//! Generated project layout on disk.

use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::error::{BuildloopError, Result};

pub const PAGES_DIR: &str = "pages";
pub const API_DIR: &str = "pages/api";
pub const DB_DIR: &str = "db";
pub const TEST_DIR: &str = "cypress/e2e";
pub const TEST_FILE: &str = "cypress/e2e/app.cy.js";

/// Root of one run's generated project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and its skeleton directories
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let workspace = Self::new(root);
        for dir in [PAGES_DIR, API_DIR, DB_DIR, TEST_DIR] {
            std::fs::create_dir_all(workspace.root.join(dir))?;
        }
        debug!("Created project skeleton at {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join(PAGES_DIR)
    }

    pub fn api_dir(&self) -> PathBuf {
        self.root.join(API_DIR)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join(DB_DIR)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.root.join(TEST_DIR)
    }

    pub fn test_file(&self) -> PathBuf {
        self.root.join(TEST_FILE)
    }

    /// Resolve a project-relative path, rejecting anything that could leave the project
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        confined_join(&self.root, relative)
    }

    /// Resolve a page URL ("/index.js", "todos/[id].js") under `pages/`
    pub fn resolve_page(&self, url: &str) -> Result<PathBuf> {
        confined_join(&self.pages_dir(), url.trim_start_matches('/'))
    }
}

/// Join `relative` onto `base`, refusing absolute paths and parent components
pub fn confined_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let mut joined = base.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BuildloopError::Tool(format!(
                    "Path escapes the project directory: {}",
                    relative
                )));
            }
        }
    }
    Ok(joined)
}
