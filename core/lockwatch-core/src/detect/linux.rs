//! logind-backed lock queries.

use crate::error::DetectionError;
use std::env;
use std::process::Command;

const SEAT: &str = "seat0";

pub fn is_workstation_locked() -> Result<bool, DetectionError> {
    let session_id = current_session_id()?;
    let output = run_loginctl(&[
        "show-session",
        &session_id,
        "--property=LockedHint",
        "--value",
    ])?;
    parse_bool_property("LockedHint", &output)
}

/// The `Name` of the session currently active on the local seat.
pub fn console_user() -> Result<Option<String>, DetectionError> {
    let output = run_loginctl(&["show-seat", SEAT, "--property=ActiveSession", "--value"])?;
    let Some(session_id) = parse_property_value(&output) else {
        return Ok(None);
    };
    let output = run_loginctl(&["show-session", &session_id, "--property=Name", "--value"])?;
    Ok(parse_property_value(&output))
}

fn current_session_id() -> Result<String, DetectionError> {
    if let Some(id) = env::var("XDG_SESSION_ID")
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        return Ok(id);
    }

    let user = env::var("USER")
        .map_err(|_| DetectionError::query("loginctl", "neither XDG_SESSION_ID nor USER is set"))?;
    let output = run_loginctl(&["show-user", &user, "--property=Display", "--value"])?;
    parse_property_value(&output)
        .ok_or_else(|| DetectionError::query("loginctl show-user", "user has no display session"))
}

fn run_loginctl(args: &[&str]) -> Result<String, DetectionError> {
    let query = format!("loginctl {}", args.join(" "));
    match Command::new("loginctl").args(args).output() {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(output) => Err(DetectionError::query(
            &query,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Err(err) => Err(DetectionError::query(&query, err.to_string())),
    }
}

pub(super) fn parse_property_value(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

pub(super) fn parse_bool_property(name: &str, output: &str) -> Result<bool, DetectionError> {
    match parse_property_value(output).as_deref() {
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        other => Err(DetectionError::query(
            name,
            format!("unexpected value {:?}", other),
        )),
    }
}
