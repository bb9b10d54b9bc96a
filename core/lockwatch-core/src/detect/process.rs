//! Process table scanning for lock-screen UIs.

use sysinfo::{ProcessRefreshKind, System};

/// Linux truncates process names to 15 bytes (`TASK_COMM_LEN - 1`).
const LINUX_COMM_LEN: usize = 15;

#[cfg(target_os = "windows")]
pub const LOCK_SCREEN_PROCESSES: &[&str] = &["LogonUI.exe"];

#[cfg(target_os = "macos")]
pub const LOCK_SCREEN_PROCESSES: &[&str] = &["ScreenSaverEngine"];

/// Only lockers that exist while the screen is locked. Screensaver daemons
/// such as `xscreensaver` or `light-locker` stay resident for the whole
/// session and would read as locked.
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const LOCK_SCREEN_PROCESSES: &[&str] =
    &["i3lock", "swaylock", "hyprlock", "kscreenlocker_greet"];

/// A process table that is created once and refreshed per scan.
pub struct ProcessTable {
    system: System,
}

impl std::fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTable").finish_non_exhaustive()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn any_running(&mut self, names: &[&str]) -> bool {
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new());
        self.system.processes().values().any(|process| {
            names
                .iter()
                .any(|name| matches_process_name(process.name(), name))
        })
    }
}

/// Case-insensitive name match that tolerates the kernel's comm truncation.
pub fn matches_process_name(actual: &str, expected: &str) -> bool {
    if actual.eq_ignore_ascii_case(expected) {
        return true;
    }
    actual.len() == LINUX_COMM_LEN
        && expected.len() > LINUX_COMM_LEN
        && expected
            .get(..LINUX_COMM_LEN)
            .map(|prefix| prefix.eq_ignore_ascii_case(actual))
            .unwrap_or(false)
}
