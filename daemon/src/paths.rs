/// Canonical file paths for UsbWatch data files on Windows.
///
/// Both files live under %APPDATA%\UsbWatch\:
///   - config.toml  Edited by the user, read once by the daemon at startup.
///   - status.toml  Written by the daemon, read by a tray/GUI front-end.
use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR_NAME: &str = "UsbWatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the UsbWatch application data directory: %APPDATA%\UsbWatch\
pub fn app_data_dir() -> Result<PathBuf> {
    let appdata = std::env::var("APPDATA").context("APPDATA environment variable not set")?;
    Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
}

/// Returns the full path to the config file: %APPDATA%\UsbWatch\config.toml
pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE_NAME))
}

/// Returns the full path to the status file: %APPDATA%\UsbWatch\status.toml
pub fn status_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(STATUS_FILE_NAME))
}

#[cfg(test)]
#[cfg(windows)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_usbwatch() {
        let dir = app_data_dir().unwrap();
        assert_eq!(dir.file_name().unwrap(), "UsbWatch");
    }

    #[test]
    fn app_data_dir_is_inside_appdata() {
        let appdata = std::env::var("APPDATA").unwrap();
        let dir = app_data_dir().unwrap();
        assert!(dir.starts_with(&appdata));
    }

    #[test]
    fn config_and_status_share_same_parent_dir() {
        let config = config_file_path().unwrap();
        let status = status_file_path().unwrap();
        assert_eq!(config.file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(status.file_name().unwrap(), STATUS_FILE_NAME);
        assert_eq!(config.parent(), status.parent());
    }
}
