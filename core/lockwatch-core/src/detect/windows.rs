//! Terminal Services (WTS) session queries.

use crate::error::DetectionError;
use std::ffi::c_void;
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::RemoteDesktop::{
    WTSDomainName, WTSFreeMemory, WTSGetActiveConsoleSessionId, WTSQuerySessionInformationW,
    WTSSessionInfoEx, WTSUserName, WTSINFOEXW, WTS_CURRENT_SERVER_HANDLE, WTS_CURRENT_SESSION,
    WTS_INFO_CLASS, WTS_SESSIONSTATE_LOCK,
};

/// Returned by `WTSGetActiveConsoleSessionId` when no session is attached
/// to the physical console.
const NO_CONSOLE_SESSION: u32 = 0xFFFF_FFFF;

/// Buffer allocated by `WTSQuerySessionInformationW`, released on drop.
struct WtsBuffer {
    ptr: *mut u16,
    len: u32,
}

impl Drop for WtsBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: `ptr` came from WTSQuerySessionInformationW and is freed once.
            unsafe { WTSFreeMemory(self.ptr as *mut c_void) };
        }
    }
}

fn query_session(session_id: u32, class: WTS_INFO_CLASS) -> Result<WtsBuffer, DetectionError> {
    let mut buffer = WtsBuffer {
        ptr: std::ptr::null_mut(),
        len: 0,
    };
    // SAFETY: out-pointers are valid for the duration of the call.
    let ok = unsafe {
        WTSQuerySessionInformationW(
            WTS_CURRENT_SERVER_HANDLE,
            session_id,
            class,
            &mut buffer.ptr,
            &mut buffer.len,
        )
    };
    if ok == 0 || buffer.ptr.is_null() {
        // SAFETY: no preconditions.
        let code = unsafe { GetLastError() };
        return Err(DetectionError::query(
            "WTSQuerySessionInformationW",
            format!("session {} class {}: win32 error {}", session_id, class, code),
        ));
    }
    Ok(buffer)
}

fn query_string(session_id: u32, class: WTS_INFO_CLASS) -> Result<String, DetectionError> {
    let buffer = query_session(session_id, class)?;
    let units = (buffer.len as usize) / std::mem::size_of::<u16>();
    // SAFETY: WTS returns `len` bytes of UTF-16 starting at `ptr`.
    let wide = unsafe { std::slice::from_raw_parts(buffer.ptr, units) };
    let end = wide.iter().position(|unit| *unit == 0).unwrap_or(wide.len());
    Ok(String::from_utf16_lossy(&wide[..end]))
}

pub fn is_workstation_locked() -> Result<bool, DetectionError> {
    let buffer = query_session(WTS_CURRENT_SESSION, WTSSessionInfoEx)?;
    if (buffer.len as usize) < std::mem::size_of::<WTSINFOEXW>() {
        return Err(DetectionError::query(
            "WTSSessionInfoEx",
            format!("short buffer of {} bytes", buffer.len),
        ));
    }
    // SAFETY: size checked above; WTS aligns the allocation for WTSINFOEXW.
    let info = unsafe { &*(buffer.ptr as *const WTSINFOEXW) };
    if info.Level != 1 {
        return Err(DetectionError::query(
            "WTSSessionInfoEx",
            format!("unexpected info level {}", info.Level),
        ));
    }
    // SAFETY: Level 1 selects the WTSInfoExLevel1 union member.
    let flags = unsafe { info.Data.WTSInfoExLevel1.SessionFlags };
    Ok(flags == WTS_SESSIONSTATE_LOCK as i32)
}

/// `DOMAIN\user` on the active console session.
pub fn console_user() -> Result<Option<String>, DetectionError> {
    // SAFETY: no preconditions.
    let session_id = unsafe { WTSGetActiveConsoleSessionId() };
    if session_id == NO_CONSOLE_SESSION {
        return Ok(None);
    }

    let user = query_string(session_id, WTSUserName)?;
    if user.trim().is_empty() {
        return Ok(None);
    }
    let domain = query_string(session_id, WTSDomainName).unwrap_or_default();
    if domain.trim().is_empty() {
        Ok(Some(user))
    } else {
        Ok(Some(format!("{}\\{}", domain, user)))
    }
}
