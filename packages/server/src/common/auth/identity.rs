use serde::{Deserialize, Serialize};

use crate::common::entity_ids::{HelperId, UserId};
use crate::common::error::{DispatchError, DispatchResult};
use crate::common::types::Role;

/// Authenticated identity attached to a request or socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
    /// Present for helper accounts only.
    pub helper_id: Option<HelperId>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The helper profile behind this identity, or `Forbidden` for non-helpers.
    pub fn require_helper(&self) -> DispatchResult<HelperId> {
        match (self.role, self.helper_id) {
            (Role::Helper, Some(helper_id)) => Ok(helper_id),
            _ => Err(DispatchError::Forbidden(
                "helper identity required".to_string(),
            )),
        }
    }
}

/// The party performing a lifecycle change. Recorded on every task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    User { user_id: UserId, role: Role },
    /// Background work: matching, sweeps, timeouts.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User { user_id, .. } => Some(*user_id),
            Actor::System => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Actor::User {
                role: Role::Admin,
                ..
            }
        )
    }

    /// Requester-or-admin gate used by cancel and retry.
    pub fn ensure_requester_or_admin(&self, requester_id: UserId) -> DispatchResult<()> {
        if self.is_admin() || self.user_id() == Some(requester_id) {
            Ok(())
        } else {
            Err(DispatchError::Forbidden(
                "only the requester or an admin may do this".to_string(),
            ))
        }
    }
}

impl From<&AuthUser> for Actor {
    fn from(user: &AuthUser) -> Self {
        Actor::User {
            user_id: user.user_id,
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requester_gate() {
        let requester = UserId::new();
        let owner = Actor::User {
            user_id: requester,
            role: Role::Requester,
        };
        let stranger = Actor::User {
            user_id: UserId::new(),
            role: Role::Requester,
        };
        let admin = Actor::User {
            user_id: UserId::new(),
            role: Role::Admin,
        };

        assert!(owner.ensure_requester_or_admin(requester).is_ok());
        assert!(admin.ensure_requester_or_admin(requester).is_ok());
        assert!(matches!(
            stranger.ensure_requester_or_admin(requester),
            Err(DispatchError::Forbidden(_))
        ));
        assert!(Actor::System.ensure_requester_or_admin(requester).is_err());
    }

    #[test]
    fn test_require_helper() {
        let helper = AuthUser {
            user_id: UserId::new(),
            role: Role::Helper,
            helper_id: Some(HelperId::new()),
        };
        let requester = AuthUser {
            user_id: UserId::new(),
            role: Role::Requester,
            helper_id: None,
        };
        assert!(helper.require_helper().is_ok());
        assert!(requester.require_helper().is_err());
    }
}
