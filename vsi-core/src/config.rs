use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/vsi/vsi.toml";
const DEFAULT_USER_REGION_PATH: &str = "/var/run/shm/vsiUserDataStore";
const DEFAULT_SYS_REGION_PATH: &str = "/var/run/shm/vsiSysDataStore";
const DEFAULT_USER_REGION_SIZE: u64 = 16 * 1024 * 1024;
const DEFAULT_SYS_REGION_SIZE: u64 = 4 * 1024 * 1024;
const DEFAULT_BTREE_MIN_DEGREE: usize = 32;
const DEFAULT_SYS_NODE_COUNT: usize = 4096;

fn default_user_region_path() -> PathBuf {
    PathBuf::from(DEFAULT_USER_REGION_PATH)
}

fn default_sys_region_path() -> PathBuf {
    PathBuf::from(DEFAULT_SYS_REGION_PATH)
}

fn default_user_region_size() -> u64 {
    DEFAULT_USER_REGION_SIZE
}

fn default_sys_region_size() -> u64 {
    DEFAULT_SYS_REGION_SIZE
}

fn default_btree_min_degree() -> usize {
    DEFAULT_BTREE_MIN_DEGREE
}

fn default_sys_node_count() -> usize {
    DEFAULT_SYS_NODE_COUNT
}

/// Configuration for a store: region file paths and sizes, plus the
/// B-tree/allocator parameters fixed at first creation. An env var names
/// the file to load; a missing or unparsable file silently falls back to
/// [`StoreConfig::default`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_user_region_path")]
    pub user_region_path: PathBuf,

    #[serde(default = "default_sys_region_path")]
    pub sys_region_path: PathBuf,

    #[serde(default = "default_user_region_size")]
    pub user_region_size: u64,

    #[serde(default = "default_sys_region_size")]
    pub sys_region_size: u64,

    #[serde(default = "default_btree_min_degree")]
    pub btree_min_degree: usize,

    #[serde(default = "default_sys_node_count")]
    pub sys_node_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            user_region_path: default_user_region_path(),
            sys_region_path: default_sys_region_path(),
            user_region_size: default_user_region_size(),
            sys_region_size: default_sys_region_size(),
            btree_min_degree: default_btree_min_degree(),
            sys_node_count: default_sys_node_count(),
        }
    }
}

impl StoreConfig {
    /// Loads from `VSI_CONFIG`, falling back to [`DEFAULT_CONFIG_PATH`].
    /// A missing file, or one that fails to parse, yields `Self::default()`
    /// rather than an error.
    pub fn load() -> Self {
        let path = std::env::var("VSI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_fields_missing() {
        let cfg: StoreConfig = toml::from_str("user_region_size = 1048576").unwrap();
        assert_eq!(cfg.user_region_size, 1048576);
        assert_eq!(cfg.sys_region_size, DEFAULT_SYS_REGION_SIZE);
        assert_eq!(cfg.btree_min_degree, DEFAULT_BTREE_MIN_DEGREE);
    }

    #[test]
    fn load_falls_back_on_missing_file() {
        // SAFETY: test is single-threaded with respect to this env var.
        unsafe {
            std::env::set_var("VSI_CONFIG", "/nonexistent/path/vsi.toml");
        }
        let cfg = StoreConfig::load();
        assert_eq!(cfg.sys_node_count, DEFAULT_SYS_NODE_COUNT);
        unsafe {
            std::env::remove_var("VSI_CONFIG");
        }
    }

    #[test]
    fn load_from_env_override() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "btree_min_degree = 8\n").unwrap();
        // SAFETY: test is single-threaded with respect to this env var.
        unsafe {
            std::env::set_var("VSI_CONFIG", file.path());
        }
        let cfg = StoreConfig::load();
        assert_eq!(cfg.btree_min_degree, 8);
        unsafe {
            std::env::remove_var("VSI_CONFIG");
        }
    }
}
