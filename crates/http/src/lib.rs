//! stack-http: reqwest transport for the STACK storage client
//!
//! This crate provides the implementation of the Transport trait using
//! reqwest. It is the only crate that directly depends on an HTTP library.

pub mod client;

pub use client::HttpTransport;

use std::sync::Arc;

use stack_core::{ConfigManager, Defaults, Profile, ProfileManager, Result, Session};

/// Unauthenticated session for `profile` over a fresh HTTP transport
pub fn connect(profile: &Profile) -> Result<Session> {
    connect_with(profile, Defaults::default())
}

/// Like [`connect`], with explicit client defaults
pub fn connect_with(profile: &Profile, defaults: Defaults) -> Result<Session> {
    let transport = HttpTransport::new(profile)?;
    Session::with_defaults(Arc::new(transport), profile, defaults)
}

/// Session for a profile saved in the configuration file
pub fn connect_profile(config_manager: ConfigManager, name: &str) -> Result<Session> {
    let defaults = config_manager.load()?.defaults;
    let profile = ProfileManager::with_config_manager(config_manager).get(name)?;
    connect_with(&profile, defaults)
}

/// Session for the profile described by the `STACK_*` environment variables
pub fn connect_from_env() -> Result<Session> {
    connect(&Profile::from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_core::{Config, Error};
    use tempfile::TempDir;

    fn config_manager(dir: &TempDir) -> ConfigManager {
        ConfigManager::with_path(dir.path().join("config.toml"))
    }

    #[test]
    fn test_connect_starts_logged_out() {
        let session = connect(&Profile::new("t", "stack.example.com", "alice", "pw")).unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.base_url(), "https://stack.example.com");
        assert_eq!(session.username(), "alice");
    }

    #[test]
    fn test_connect_rejects_empty_username() {
        let result = connect(&Profile::new("t", "stack.example.com", "", "pw"));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_connect_profile_uses_saved_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = config_manager(&dir);
        let mut config = Config::default();
        config.defaults.page_size = 250;
        config
            .profiles
            .push(Profile::new("work", "work.example.com", "bob", "pw"));
        manager.save(&config).unwrap();

        let session = connect_profile(config_manager(&dir), "work").unwrap();
        assert_eq!(session.defaults().page_size, 250);
        assert_eq!(session.username(), "bob");

        let missing = connect_profile(config_manager(&dir), "home");
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
