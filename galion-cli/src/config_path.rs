//! Default config file location resolution.

use std::path::PathBuf;

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/galion/config.toml`
/// 2. `$HOME/.config/galion/config.toml`
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("galion").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("galion").join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = std::env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_xdg_config_home_when_set() {
        // SAFETY: test-only, single-threaded env mutation scoped to this test.
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/xdgtest");
        }
        let path = resolve_default_config_path();
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
        assert_eq!(path, Some(PathBuf::from("/tmp/xdgtest/galion/config.toml")));
    }
}
