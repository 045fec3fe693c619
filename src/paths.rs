//! Config directory resolution and legacy migration (spec.md §6 "Paths").

use std::path::{Path, PathBuf};

use crate::log_info;

pub const BACKEND_SERVERS_FILE: &str = "backend-servers.json";
pub const GROUPS_FILE: &str = "groups.json";

/// The OS-specific user config directory for this proxy:
/// `$XDG_CONFIG_HOME/mcp-proxy/` on Unix, platform-equivalent elsewhere.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mcp-proxy")
}

/// The legacy project-relative config location.
pub fn legacy_config_dir() -> PathBuf {
    PathBuf::from("./config")
}

/// Migrate legacy config files into the user config directory, once, on
/// startup (spec.md §6: "if a legacy file exists and the user-dir file does
/// not, copy over; log the migration. Never overwrite.").
pub fn migrate_legacy_configs(user_dir: &Path, legacy_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(user_dir)?;
    for file_name in [BACKEND_SERVERS_FILE, GROUPS_FILE] {
        let legacy_path = legacy_dir.join(file_name);
        let user_path = user_dir.join(file_name);
        if legacy_path.exists() && !user_path.exists() {
            std::fs::copy(&legacy_path, &user_path)?;
            log_info!(
                from = %legacy_path.display(),
                to = %user_path.display(),
                "migrated legacy config file"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn migrates_legacy_file_when_user_dir_file_absent() {
        let legacy = tempdir().unwrap();
        let user = tempdir().unwrap();
        std::fs::write(legacy.path().join(GROUPS_FILE), "{}").unwrap();

        migrate_legacy_configs(user.path(), legacy.path()).unwrap();

        assert!(user.path().join(GROUPS_FILE).exists());
    }

    #[test]
    fn never_overwrites_existing_user_dir_file() {
        let legacy = tempdir().unwrap();
        let user = tempdir().unwrap();
        std::fs::write(legacy.path().join(GROUPS_FILE), "{\"legacy\": true}").unwrap();
        std::fs::create_dir_all(user.path()).unwrap();
        std::fs::write(user.path().join(GROUPS_FILE), "{\"current\": true}").unwrap();

        migrate_legacy_configs(user.path(), legacy.path()).unwrap();

        let contents = std::fs::read_to_string(user.path().join(GROUPS_FILE)).unwrap();
        assert_eq!(contents, "{\"current\": true}");
    }

    #[test]
    fn s6_second_startup_is_a_no_op_even_if_legacy_differs() {
        let legacy = tempdir().unwrap();
        let user = tempdir().unwrap();
        std::fs::write(legacy.path().join(GROUPS_FILE), "{\"v\": 1}").unwrap();

        migrate_legacy_configs(user.path(), legacy.path()).unwrap();
        std::fs::write(legacy.path().join(GROUPS_FILE), "{\"v\": 2}").unwrap();
        migrate_legacy_configs(user.path(), legacy.path()).unwrap();

        let contents = std::fs::read_to_string(user.path().join(GROUPS_FILE)).unwrap();
        assert_eq!(contents, "{\"v\": 1}");
    }
}
