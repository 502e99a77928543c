//! Test environment abstraction for isolated config testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated "home" with `.memhook/config.toml`
//! - An isolated project root with its own `.memhook/config.toml`
//!
//! # Usage
//!
//! ```ignore
//! use memhook_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! env.write_global("[recorder]\nenabled = true\n")?;
//! let config = env.load()?;
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique config locations
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Stand-in for `$HOME`
    pub home: PathBuf,
    /// Project root for the test
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let home = root.join("home");
        let project_root = root.join(format!("project-{}", test_id));

        std::fs::create_dir_all(home.join(".memhook"))?;
        std::fs::create_dir_all(project_root.join(".memhook"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            home,
            project_root,
            test_id,
        })
    }

    /// Path of the global config inside the fake home
    pub fn global_config_path(&self) -> PathBuf {
        self.home.join(".memhook").join("config.toml")
    }

    /// Path of the project-local config
    pub fn project_config_path(&self) -> PathBuf {
        self.project_root.join(".memhook").join("config.toml")
    }

    pub fn write_global(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.global_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_project(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Load config from this environment's files (no env overrides)
    pub fn load(&self) -> anyhow::Result<crate::Config> {
        let global = self.global_config_path();
        let project = self.project_config_path();
        Ok(crate::Config::load_from(
            Some(global.as_path()),
            Some(project.as_path()),
        )?)
    }
}
