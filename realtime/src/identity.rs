use events::{PermissionLevel, ScopeType};
use serde::{Deserialize, Serialize};

/// A permission the user holds at one scope, as reported by the external
/// permission service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(rename = "scopeType")]
    pub scope_type: ScopeType,
    #[serde(rename = "scopeID", default)]
    pub scope_id: String,
    pub level: PermissionLevel,
}

impl Grant {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            scope_type,
            scope_id: scope_id.into(),
            level,
        }
    }
}

/// Pre-validated identity attached to a connection: the authenticated username
/// and a snapshot of the contexts the user held when the connection was
/// established. The snapshot is never refreshed for the lifetime of the
/// connection; a permission change requires the client to reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default, rename = "permissions")]
    pub grants: Vec<Grant>,
}

impl Identity {
    pub fn new(username: impl Into<String>, grants: Vec<Grant>) -> Self {
        Self {
            username: username.into(),
            grants,
        }
    }

    /// Highest level held at exactly this scope. No hierarchy traversal: an
    /// organization grant says nothing about the projects inside it.
    pub fn level_at(&self, scope_type: ScopeType, scope_id: &str) -> Option<PermissionLevel> {
        self.grants
            .iter()
            .filter(|grant| grant.scope_type == scope_type && grant.scope_id == scope_id)
            .map(|grant| grant.level)
            .max()
    }

    /// Highest level held anywhere. Used to authorize global events.
    pub fn highest_level(&self) -> Option<PermissionLevel> {
        self.grants.iter().map(|grant| grant.level).max()
    }

    pub fn holds(&self, scope_type: ScopeType, scope_id: &str) -> bool {
        self.level_at(scope_type, scope_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_at_requires_exact_scope() {
        let identity = Identity::new(
            "alice",
            vec![
                Grant::new(ScopeType::Organization, "o1", PermissionLevel::Delete),
                Grant::new(ScopeType::Project, "p1", PermissionLevel::Read),
            ],
        );

        assert_eq!(
            identity.level_at(ScopeType::Project, "p1"),
            Some(PermissionLevel::Read)
        );
        assert_eq!(identity.level_at(ScopeType::Project, "p2"), None);
        // Organization grant does not leak into project scope.
        assert_eq!(identity.level_at(ScopeType::Project, "o1"), None);
        assert_eq!(identity.highest_level(), Some(PermissionLevel::Delete));
    }

    #[test]
    fn duplicate_grants_resolve_to_highest_level() {
        let identity = Identity::new(
            "bob",
            vec![
                Grant::new(ScopeType::Team, "t1", PermissionLevel::Read),
                Grant::new(ScopeType::Team, "t1", PermissionLevel::Update),
            ],
        );

        assert_eq!(
            identity.level_at(ScopeType::Team, "t1"),
            Some(PermissionLevel::Update)
        );
    }

    #[test]
    fn deserializes_permission_service_payload() {
        let identity: Identity = serde_json::from_value(json!({
            "username": "carol",
            "permissions": [
                {"scopeType": "project", "scopeID": "p1", "level": "UPDATE"}
            ]
        }))
        .unwrap();

        assert_eq!(identity.username, "carol");
        assert!(identity.holds(ScopeType::Project, "p1"));
    }
}
