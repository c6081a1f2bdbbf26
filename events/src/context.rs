use serde::{Deserialize, Serialize};
use std::fmt;

/// Access level a user holds within a scope. Levels are ordered, so a user
/// holding `Delete` also satisfies `Read`, `Create` and `Update`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
    #[default]
    #[serde(alias = "read")]
    Read = 1,
    #[serde(alias = "create")]
    Create = 2,
    #[serde(alias = "update")]
    Update = 3,
    /// Also represents ALL permissions.
    #[serde(alias = "delete")]
    Delete = 5,
}

impl PermissionLevel {
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PermissionLevel::Read => write!(f, "READ"),
            PermissionLevel::Create => write!(f, "CREATE"),
            PermissionLevel::Update => write!(f, "UPDATE"),
            PermissionLevel::Delete => write!(f, "DELETE"),
        }
    }
}

/// The kind of scope an event is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Project,
    Organization,
    Team,
    Account,
    Global,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScopeType::Project => write!(f, "project"),
            ScopeType::Organization => write!(f, "organization"),
            ScopeType::Team => write!(f, "team"),
            ScopeType::Account => write!(f, "account"),
            ScopeType::Global => write!(f, "global"),
        }
    }
}

/// Authorization scope of a published event together with the minimum
/// permission level a connection must hold at that scope to receive it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "scopeType")]
    pub scope_type: ScopeType,
    /// Empty for `ScopeType::Global`.
    #[serde(rename = "scopeID", default)]
    pub scope_id: String,
    #[serde(rename = "requiredPermission", default)]
    pub required_permission: PermissionLevel,
}

impl Context {
    pub fn new(
        scope_type: ScopeType,
        scope_id: impl Into<String>,
        required_permission: PermissionLevel,
    ) -> Self {
        let scope_id = match scope_type {
            ScopeType::Global => String::new(),
            _ => scope_id.into(),
        };

        Self {
            scope_type,
            scope_id,
            required_permission,
        }
    }

    pub fn project(project_id: impl Into<String>, required: PermissionLevel) -> Self {
        Self::new(ScopeType::Project, project_id, required)
    }

    pub fn organization(organization_id: impl Into<String>, required: PermissionLevel) -> Self {
        Self::new(ScopeType::Organization, organization_id, required)
    }

    pub fn team(team_id: impl Into<String>, required: PermissionLevel) -> Self {
        Self::new(ScopeType::Team, team_id, required)
    }

    pub fn account(account_id: impl Into<String>, required: PermissionLevel) -> Self {
        Self::new(ScopeType::Account, account_id, required)
    }

    pub fn global(required: PermissionLevel) -> Self {
        Self::new(ScopeType::Global, "", required)
    }

    pub fn is_global(&self) -> bool {
        self.scope_type == ScopeType::Global
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_global() {
            write!(f, "global[{}]", self.required_permission)
        } else {
            write!(
                f,
                "{}:{}[{}]",
                self.scope_type, self.scope_id, self.required_permission
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_levels_are_monotonic() {
        assert!(PermissionLevel::Delete.satisfies(PermissionLevel::Read));
        assert!(PermissionLevel::Update.satisfies(PermissionLevel::Create));
        assert!(PermissionLevel::Read.satisfies(PermissionLevel::Read));
        assert!(!PermissionLevel::Read.satisfies(PermissionLevel::Update));
        assert!(!PermissionLevel::Update.satisfies(PermissionLevel::Delete));
    }

    #[test]
    fn permission_level_accepts_either_case() {
        let upper: PermissionLevel = serde_json::from_value(json!("UPDATE")).unwrap();
        let lower: PermissionLevel = serde_json::from_value(json!("update")).unwrap();
        assert_eq!(upper, PermissionLevel::Update);
        assert_eq!(lower, PermissionLevel::Update);
    }

    #[test]
    fn global_context_discards_scope_id() {
        let context = Context::new(ScopeType::Global, "ignored", PermissionLevel::Read);
        assert_eq!(context.scope_id, "");
        assert!(context.is_global());
    }

    #[test]
    fn context_deserializes_wire_field_names() {
        let context: Context = serde_json::from_value(json!({
            "scopeType": "project",
            "scopeID": "p-123",
            "requiredPermission": "READ"
        }))
        .unwrap();

        assert_eq!(context, Context::project("p-123", PermissionLevel::Read));
    }

    #[test]
    fn context_required_permission_defaults_to_read() {
        let context: Context =
            serde_json::from_value(json!({"scopeType": "team", "scopeID": "t-1"})).unwrap();
        assert_eq!(context.required_permission, PermissionLevel::Read);
    }
}
