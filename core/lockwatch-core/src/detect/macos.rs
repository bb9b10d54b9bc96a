//! Console user lookup on macOS.

use crate::error::DetectionError;
use std::process::Command;

/// Owner of `/dev/console` is the user at the login window or desktop.
/// `root` means nobody is logged in.
pub fn console_user() -> Result<Option<String>, DetectionError> {
    let output = Command::new("stat")
        .args(["-f", "%Su", "/dev/console"])
        .output()
        .map_err(|err| DetectionError::query("stat /dev/console", err.to_string()))?;
    if !output.status.success() {
        return Err(DetectionError::query(
            "stat /dev/console",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if user.is_empty() || user == "root" {
        return Ok(None);
    }
    Ok(Some(user))
}
