use crate::core::error::{Result, StatusCacheError};
use std::path::PathBuf;

const APP_DIR: &str = "wc-status-cache";

pub fn get_config_directory() -> Result<PathBuf> {
    let base = match std::env::consts::OS {
        "linux" | "freebsd" | "netbsd" | "openbsd" => std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config"))),
        "macos" => dirs::home_dir().map(|home| home.join("Library/Application Support")),
        _ => dirs::config_dir(),
    };

    base.map(|base| base.join(APP_DIR))
        .ok_or(StatusCacheError::CacheDirectoryNotFound)
}

pub fn get_cache_directory() -> Result<PathBuf> {
    let base = match std::env::consts::OS {
        "linux" | "freebsd" | "netbsd" | "openbsd" => std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache"))),
        "macos" => dirs::home_dir().map(|home| home.join("Library/Caches")),
        _ => dirs::cache_dir(),
    };

    base.map(|base| base.join(APP_DIR))
        .ok_or(StatusCacheError::CacheDirectoryNotFound)
}
