//! 周期任务进程的身份切换

use periodic_core::identity::{current_group, current_user};
use periodic_core::{ProcessIdentity, SchedulerError, SchedulerResult};

/// 切换到目标身份：先重置附加组，再切换用户组，最后切换用户
///
/// 附加组只保留目标用户组，不会继承监督进程的附加组（例如 root 组）。
/// 已经是目标身份时返回 `Ok(false)`，不做任何系统调用。
pub fn switch_identity(target: &ProcessIdentity) -> SchedulerResult<bool> {
    let group_matches = target.group == current_group();
    let user_matches = target.user == current_user();
    if group_matches && user_matches {
        return Ok(false);
    }
    switch(target, group_matches, user_matches)?;
    Ok(true)
}

#[cfg(unix)]
fn switch(target: &ProcessIdentity, group_matches: bool, user_matches: bool) -> SchedulerResult<()> {
    use periodic_core::identity::{lookup_gid, lookup_uid};

    // 先解析两者，避免只切换了一半
    let gid = lookup_gid(&target.group)?;
    let uid = lookup_uid(&target.user)?;

    let groups = [gid];
    // SAFETY: the pointer and length describe the live `groups` array.
    if unsafe { libc::setgroups(groups.len() as _, groups.as_ptr()) } != 0 {
        return Err(SchedulerError::IdentityResolution(format!(
            "重置附加组为 {} 失败: {}",
            target.group,
            std::io::Error::last_os_error()
        )));
    }
    if !group_matches {
        // SAFETY: setgid only reads its integer argument.
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(SchedulerError::IdentityResolution(format!(
                "切换用户组 {} 失败: {}",
                target.group,
                std::io::Error::last_os_error()
            )));
        }
    }
    if !user_matches {
        // SAFETY: setuid only reads its integer argument.
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(SchedulerError::IdentityResolution(format!(
                "切换用户 {} 失败: {}",
                target.user,
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn switch(target: &ProcessIdentity, _group_matches: bool, _user_matches: bool) -> SchedulerResult<()> {
    Err(SchedulerError::IdentityResolution(format!(
        "当前平台不支持切换身份: {target}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_identity_is_a_noop() {
        assert!(!switch_identity(&ProcessIdentity::current()).unwrap());
    }

    #[test]
    fn test_unknown_user_fails_without_switching() {
        let before = ProcessIdentity::current();
        let target = ProcessIdentity::new("no-such-user-for-periodic-tests", before.group.clone());
        let err = switch_identity(&target).unwrap_err();
        assert!(matches!(err, SchedulerError::IdentityResolution(_)));
        assert_eq!(ProcessIdentity::current(), before);
    }
}
