//! 进程身份（用户/用户组）
//!
//! 周期任务进程以声明的用户和用户组运行，未声明时继承当前进程的有效身份。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 周期任务进程的运行身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub user: String,
    pub group: String,
}

impl ProcessIdentity {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }

    /// 当前进程的有效身份
    pub fn current() -> Self {
        Self {
            user: current_user(),
            group: current_group(),
        }
    }

    /// 按声明解析身份，缺省部分使用当前进程身份
    pub fn resolve(user: Option<&str>, group: Option<&str>) -> Self {
        Self {
            user: user
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .unwrap_or_else(current_user),
            group: group
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .unwrap_or_else(current_group),
        }
    }

    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

/// 当前有效用户名，无法解析时返回数字 uid
pub fn current_user() -> String {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let uid = unsafe { libc::geteuid() };
        sys::user_name(uid).unwrap_or_else(|| uid.to_string())
    }
    #[cfg(not(unix))]
    {
        "unknown".to_string()
    }
}

/// 当前有效用户组名，无法解析时返回数字 gid
pub fn current_group() -> String {
    #[cfg(unix)]
    {
        // SAFETY: getegid has no preconditions and cannot fail.
        let gid = unsafe { libc::getegid() };
        sys::group_name(gid).unwrap_or_else(|| gid.to_string())
    }
    #[cfg(not(unix))]
    {
        "unknown".to_string()
    }
}

/// 用户名（或数字字符串）解析为 uid
#[cfg(unix)]
pub fn lookup_uid(user: &str) -> SchedulerResult<libc::uid_t> {
    if let Ok(uid) = user.parse::<libc::uid_t>() {
        return Ok(uid);
    }
    sys::user_id(user)
        .ok_or_else(|| SchedulerError::IdentityResolution(format!("用户不存在: {user}")))
}

/// 用户组名（或数字字符串）解析为 gid
#[cfg(unix)]
pub fn lookup_gid(group: &str) -> SchedulerResult<libc::gid_t> {
    if let Ok(gid) = group.parse::<libc::gid_t>() {
        return Ok(gid);
    }
    sys::group_id(group)
        .ok_or_else(|| SchedulerError::IdentityResolution(format!("用户组不存在: {group}")))
}

#[cfg(unix)]
mod sys {
    use std::ffi::{CStr, CString};
    use std::mem::MaybeUninit;
    use std::ptr;

    const BUF_LEN: usize = 16 * 1024;

    pub(super) fn user_name(uid: libc::uid_t) -> Option<String> {
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut buf = vec![0 as libc::c_char; BUF_LEN];
        let mut result: *mut libc::passwd = ptr::null_mut();
        // SAFETY: all pointers reference live buffers of the declared sizes.
        let rc = unsafe {
            libc::getpwuid_r(uid, pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: result is non-null, so pwd was initialised and pw_name points into buf.
        let name = unsafe { CStr::from_ptr((*result).pw_name) };
        Some(name.to_string_lossy().into_owned())
    }

    pub(super) fn group_name(gid: libc::gid_t) -> Option<String> {
        let mut grp = MaybeUninit::<libc::group>::uninit();
        let mut buf = vec![0 as libc::c_char; BUF_LEN];
        let mut result: *mut libc::group = ptr::null_mut();
        // SAFETY: all pointers reference live buffers of the declared sizes.
        let rc = unsafe {
            libc::getgrgid_r(gid, grp.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: result is non-null, so grp was initialised and gr_name points into buf.
        let name = unsafe { CStr::from_ptr((*result).gr_name) };
        Some(name.to_string_lossy().into_owned())
    }

    pub(super) fn user_id(name: &str) -> Option<libc::uid_t> {
        let c_name = CString::new(name).ok()?;
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut buf = vec![0 as libc::c_char; BUF_LEN];
        let mut result: *mut libc::passwd = ptr::null_mut();
        // SAFETY: c_name is NUL terminated, other pointers reference live buffers.
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: result is non-null and points to the initialised pwd.
        Some(unsafe { (*result).pw_uid })
    }

    pub(super) fn group_id(name: &str) -> Option<libc::gid_t> {
        let c_name = CString::new(name).ok()?;
        let mut grp = MaybeUninit::<libc::group>::uninit();
        let mut buf = vec![0 as libc::c_char; BUF_LEN];
        let mut result: *mut libc::group = ptr::null_mut();
        // SAFETY: c_name is NUL terminated, other pointers reference live buffers.
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: result is non-null and points to the initialised grp.
        Some(unsafe { (*result).gr_gid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_declared_values() {
        let identity = ProcessIdentity::resolve(Some("www-data"), Some("www-data"));
        assert_eq!(identity, ProcessIdentity::new("www-data", "www-data"));
        assert_eq!(identity.to_string(), "www-data:www-data");
    }

    #[test]
    fn test_resolve_falls_back_to_current_identity() {
        let identity = ProcessIdentity::resolve(None, Some(""));
        assert_eq!(identity.user, current_user());
        assert_eq!(identity.group, current_group());
        assert!(!identity.user.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_numeric_and_unknown() {
        assert_eq!(lookup_uid("0").unwrap(), 0);
        assert_eq!(lookup_gid("0").unwrap(), 0);
        assert!(lookup_uid("no-such-user-for-periodic-tests").is_err());
        assert!(lookup_gid("no-such-group-for-periodic-tests").is_err());
    }
}
