//! Roles and the single authorization decision point for profile mutations.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::api::handlers::auth::principal::Principal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Manager,
    Staff,
}

impl Role {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manager" => Some(Self::Manager),
            "staff" => Some(Self::Staff),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Staff => "staff",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("profile belongs to another user")]
    NotOwner,
}

/// Every mutating profile operation funnels through here: the acting user
/// must be a manager or own the profile.
pub fn authorize(principal: &Principal, owner_id: Uuid) -> Result<(), PolicyError> {
    if principal.role == Role::Manager || principal.user_id == owner_id {
        Ok(())
    } else {
        Err(PolicyError::NotOwner)
    }
}

/// Owner-only check. Edit requests come from the profile owner; managers
/// have no reason to request edit access they can grant themselves.
pub fn authorize_owner(principal: &Principal, owner_id: Uuid) -> Result<(), PolicyError> {
    if principal.user_id == owner_id {
        Ok(())
    } else {
        Err(PolicyError::NotOwner)
    }
}

/// A lock only blocks writes while unexpired. An expired lock leaves
/// `is_locked` set until a manager or an approval clears it; reads report the
/// stale flag as-is and writes pass through.
#[must_use]
pub fn lock_active(is_locked: bool, lock_expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    is_locked && lock_expires_at.is_some_and(|expires| now < expires)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "user@example.edu".to_string(),
            role,
        }
    }

    #[test]
    fn role_parse_round_trips() {
        assert_eq!(Role::parse("manager"), Some(Role::Manager));
        assert_eq!(Role::parse("staff"), Some(Role::Staff));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Manager.as_str(), "manager");
        assert_eq!(Role::Staff.as_str(), "staff");
    }

    #[test]
    fn manager_may_touch_any_profile() {
        let manager = principal(Role::Manager);
        assert_eq!(authorize(&manager, Uuid::new_v4()), Ok(()));
    }

    #[test]
    fn staff_may_touch_only_own_profile() {
        let staff = principal(Role::Staff);
        assert_eq!(authorize(&staff, staff.user_id), Ok(()));
        assert_eq!(
            authorize(&staff, Uuid::new_v4()),
            Err(PolicyError::NotOwner)
        );
    }

    #[test]
    fn edit_requests_are_owner_only_even_for_managers() {
        let manager = principal(Role::Manager);
        assert_eq!(authorize_owner(&manager, manager.user_id), Ok(()));
        assert_eq!(
            authorize_owner(&manager, Uuid::new_v4()),
            Err(PolicyError::NotOwner)
        );
    }

    #[test]
    fn lock_blocks_only_while_unexpired() {
        let now = Utc::now();
        assert!(lock_active(true, Some(now + Duration::hours(1)), now));
        assert!(!lock_active(true, Some(now - Duration::seconds(1)), now));
        assert!(!lock_active(true, None, now));
        assert!(!lock_active(false, Some(now + Duration::hours(1)), now));
    }
}
