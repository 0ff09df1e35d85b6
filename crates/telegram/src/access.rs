//! Allowlist gate for inbound messages and button presses.

use relay_common::UserId;

/// Reason an inbound update was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    NoSender,
    NotOnAllowlist,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSender => write!(f, "update has no sender"),
            Self::NotOnAllowlist => write!(f, "user not on allowlist"),
        }
    }
}

/// Allow `user` when the allowlist is empty or names it.
///
/// Entries match the numeric user id or the username, with or without a
/// leading `@`, ignoring case.
pub fn check_access(
    allowlist: &[String],
    user: Option<UserId>,
    username: Option<&str>,
) -> Result<(), AccessDenied> {
    let Some(user) = user else {
        return Err(AccessDenied::NoSender);
    };
    if allowlist.is_empty() {
        return Ok(());
    }

    let id = user.to_string();
    let allowed = allowlist.iter().any(|entry| {
        let entry = entry.trim().trim_start_matches('@');
        entry == id || username.is_some_and(|name| entry.eq_ignore_ascii_case(name))
    });
    if allowed {
        Ok(())
    } else {
        Err(AccessDenied::NotOnAllowlist)
    }
}
