//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - a temporary backend root
//! - a project directory with its own `.linkstore/config.toml`
//! - a matching [`Config`](crate::Config)
//!
//! # Usage
//!
//! ```ignore
//! use linkstore_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.store_root, env.project_root and env.config are all isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, ENV_HASH, ENV_ROOT};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Backend root for this test
    pub store_root: PathBuf,
    /// Working directory holding the project config
    pub project_root: PathBuf,
    /// Config pointing at `store_root`
    pub config: Config,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join(format!("store-{test_id}"));
        let project_root = root.join("project");
        std::fs::create_dir_all(&store_root)?;
        std::fs::create_dir_all(project_root.join(".linkstore"))?;

        let mut config = Config::default();
        config.storage.root = store_root.clone();
        // Keep probes cheap in tests.
        config.dedup.probe_size = 4096;
        std::fs::write(project_root.join(".linkstore/config.toml"), config.to_toml())?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            project_root,
            config,
            test_id,
        })
    }

    /// Path of the project config file
    pub fn config_path(&self) -> PathBuf {
        self.project_root.join(".linkstore/config.toml")
    }

    /// Create a file under the store root with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.store_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Environment for spawning the CLI against this environment.
    ///
    /// Built from `config` so the child sees the same root and hash.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_ROOT.to_string(), self.config.storage.root.display().to_string()),
            (ENV_HASH.to_string(), self.config.dedup.hash.to_string()),
        ]
    }

    /// Whether the temp filesystem supports user extended attributes.
    pub fn supports_xattrs(&self) -> bool {
        let probe = self.store_root.join(format!(".xattr-probe-{}", self.test_id));
        if std::fs::write(&probe, b"x").is_err() {
            return false;
        }
        let supported = xattr_set(&probe);
        let _ = std::fs::remove_file(&probe);
        supported
    }
}

fn xattr_set(path: &std::path::Path) -> bool {
    use linkstore_cas::{AttributeStore, XattrStore};
    XattrStore.set(path, "user.linkstore.probe", "1").is_ok()
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
