//! Session state consumed by the sync and migration engines.
//!
//! Sign-in flows live outside the core; the engines only need to know who the
//! effective owner is and whether the session can reach a backend.

use serde::{Deserialize, Serialize};

use crate::models::OwnerId;

/// What the engines need to know about the current user.
pub trait AuthContext: Send + Sync {
    /// Owner whose records the user sees right now.
    fn effective_owner_id(&self) -> OwnerId;

    /// Signed in with a session that can talk to a backend.
    fn is_authenticated_online(&self) -> bool;

    /// Signed in, but working from a cached session without connectivity.
    fn is_authenticated_offline(&self) -> bool;

    /// The device's anonymous owner id, if one was ever issued.
    fn anonymous_owner_id(&self) -> Option<OwnerId>;

    /// The signed-in account, if any.
    fn authenticated_owner_id(&self) -> Option<OwnerId>;
}

/// Connectivity of a signed-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Concrete session held by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub anonymous_owner: Option<OwnerId>,
    pub user: Option<OwnerId>,
    pub connectivity: Connectivity,
}

impl SessionState {
    /// A device that has never signed in.
    pub const fn anonymous(anonymous_owner: OwnerId) -> Self {
        Self {
            anonymous_owner: Some(anonymous_owner),
            user: None,
            connectivity: Connectivity::Offline,
        }
    }

    /// A signed-in session, remembering the device's anonymous owner if any.
    pub const fn authenticated(
        anonymous_owner: Option<OwnerId>,
        user: OwnerId,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            anonymous_owner,
            user: Some(user),
            connectivity,
        }
    }
}

impl AuthContext for SessionState {
    fn effective_owner_id(&self) -> OwnerId {
        self.user
            .clone()
            .or_else(|| self.anonymous_owner.clone())
            .unwrap_or_else(OwnerId::anonymous)
    }

    fn is_authenticated_online(&self) -> bool {
        self.user.is_some() && self.connectivity == Connectivity::Online
    }

    fn is_authenticated_offline(&self) -> bool {
        self.user.is_some() && self.connectivity == Connectivity::Offline
    }

    fn anonymous_owner_id(&self) -> Option<OwnerId> {
        self.anonymous_owner.clone()
    }

    fn authenticated_owner_id(&self) -> Option<OwnerId> {
        self.user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_session_uses_device_owner() {
        let anon = OwnerId::new("anon-1");
        let session = SessionState::anonymous(anon.clone());

        assert_eq!(session.effective_owner_id(), anon);
        assert!(!session.is_authenticated_online());
        assert!(!session.is_authenticated_offline());
        assert_eq!(session.authenticated_owner_id(), None);
    }

    #[test]
    fn authenticated_session_prefers_user() {
        let session = SessionState::authenticated(
            Some(OwnerId::new("anon-1")),
            OwnerId::new("user-1"),
            Connectivity::Online,
        );

        assert_eq!(session.effective_owner_id(), OwnerId::new("user-1"));
        assert!(session.is_authenticated_online());
        assert_eq!(session.anonymous_owner_id(), Some(OwnerId::new("anon-1")));
    }

    #[test]
    fn offline_session_is_not_online() {
        let session =
            SessionState::authenticated(None, OwnerId::new("user-1"), Connectivity::Offline);
        assert!(session.is_authenticated_offline());
        assert!(!session.is_authenticated_online());
    }
}
