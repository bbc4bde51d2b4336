//! XDG Base Directory paths for warden.
//!
//! CLI tools should use XDG paths for cross-platform consistency,
//! not platform-native paths. This matches tools like gh, docker, kubectl.

use std::path::PathBuf;

/// Get the warden config directory.
///
/// Returns `$XDG_CONFIG_HOME/warden` if set, otherwise `~/.config/warden`.
/// This is where the supervisor config and per-app daemon manifests live.
///
/// # Examples
///
/// ```
/// use warden_paths::config_dir;
///
/// let config = config_dir();
/// let manifests = config.join("apps");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("warden")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/warden")
    } else {
        PathBuf::from(".config/warden")
    }
}

/// Get the warden data directory.
///
/// Returns `$XDG_DATA_HOME/warden` if set, otherwise `~/.local/share/warden`.
/// This is where daemon log files are stored.
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("warden")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share/warden")
    } else {
        PathBuf::from(".local/share/warden")
    }
}

/// Get the warden state directory.
///
/// Returns `$XDG_STATE_HOME/warden` if set, otherwise `~/.local/state/warden`.
/// This is where per-daemon runtime records and autostart flags are stored.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(xdg_state).join("warden")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/state/warden")
    } else {
        PathBuf::from(".local/state/warden")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_warden() {
        let path = config_dir();
        assert!(
            path.ends_with("warden"),
            "config_dir should end with 'warden'"
        );
    }

    #[test]
    fn test_data_dir_ends_with_warden() {
        let path = data_dir();
        assert!(path.ends_with("warden"), "data_dir should end with 'warden'");
    }

    #[test]
    fn test_state_dir_ends_with_warden() {
        let path = state_dir();
        assert!(
            path.ends_with("warden"),
            "state_dir should end with 'warden'"
        );
    }

    #[test]
    fn test_config_dir_respects_xdg_env() {
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        }
        let path = config_dir();
        assert_eq!(path, PathBuf::from("/tmp/test-config/warden"));
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    fn test_state_dir_respects_xdg_env() {
        unsafe {
            std::env::set_var("XDG_STATE_HOME", "/tmp/test-state");
        }
        let path = state_dir();
        assert_eq!(path, PathBuf::from("/tmp/test-state/warden"));
        unsafe {
            std::env::remove_var("XDG_STATE_HOME");
        }
    }
}
