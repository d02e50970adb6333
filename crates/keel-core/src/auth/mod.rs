//! Authentication and authorization types for Keel.
//!
//! This module provides:
//! - User and Role definitions
//! - Capability-string RBAC (`Capability`), checked per route
//! - API key management for programmatic access
//! - Session data structures
//! - Password hashing utilities (see [`password`])
//! - Authorization context threaded through domain operations

pub mod password;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Capabilities gating API routes and domain operations.
///
/// Routes check a capability string (e.g. `assets:write`); roles map to
/// fixed capability sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read people and teams.
    PeopleRead,
    /// Create/update people, teams, and the org chart.
    PeopleWrite,
    /// Read assets, assignments, and lifecycle events.
    AssetsRead,
    /// Create/update/assign assets and run device sync.
    AssetsWrite,
    /// Read frameworks, controls, SoA, risks, and evidence.
    SecurityRead,
    /// Modify compliance records.
    SecurityWrite,
    /// Read documents, versions, and rollouts.
    DocsRead,
    /// Create/update documents and rollouts.
    DocsWrite,
    /// Acknowledge a rollout addressed to the caller.
    DocsAcknowledge,
    /// Read workflow templates and instances.
    WorkflowsRead,
    /// Create instances and drive step/instance transitions.
    WorkflowsWrite,
    /// Manage users, API keys, and organization settings.
    OrgAdmin,
}

impl Capability {
    /// Returns every capability.
    pub fn all() -> HashSet<Capability> {
        HashSet::from([
            Capability::PeopleRead,
            Capability::PeopleWrite,
            Capability::AssetsRead,
            Capability::AssetsWrite,
            Capability::SecurityRead,
            Capability::SecurityWrite,
            Capability::DocsRead,
            Capability::DocsWrite,
            Capability::DocsAcknowledge,
            Capability::WorkflowsRead,
            Capability::WorkflowsWrite,
            Capability::OrgAdmin,
        ])
    }

    /// Returns the capability string checked by routes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PeopleRead => "people:read",
            Capability::PeopleWrite => "people:write",
            Capability::AssetsRead => "assets:read",
            Capability::AssetsWrite => "assets:write",
            Capability::SecurityRead => "security:read",
            Capability::SecurityWrite => "security:write",
            Capability::DocsRead => "docs:read",
            Capability::DocsWrite => "docs:write",
            Capability::DocsAcknowledge => "docs:acknowledge",
            Capability::WorkflowsRead => "workflows:read",
            Capability::WorkflowsWrite => "workflows:write",
            Capability::OrgAdmin => "org:admin",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "people:read" => Ok(Capability::PeopleRead),
            "people:write" => Ok(Capability::PeopleWrite),
            "assets:read" => Ok(Capability::AssetsRead),
            "assets:write" => Ok(Capability::AssetsWrite),
            "security:read" => Ok(Capability::SecurityRead),
            "security:write" => Ok(Capability::SecurityWrite),
            "docs:read" => Ok(Capability::DocsRead),
            "docs:write" => Ok(Capability::DocsWrite),
            "docs:acknowledge" => Ok(Capability::DocsAcknowledge),
            "workflows:read" => Ok(Capability::WorkflowsRead),
            "workflows:write" => Ok(Capability::WorkflowsWrite),
            "org:admin" => Ok(Capability::OrgAdmin),
            _ => Err(()),
        }
    }
}

/// User role for role-based access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full organization access, can manage users and settings.
    Admin,
    /// Operational access to all domain records.
    Manager,
    /// Regular employee: read access plus acknowledgments and assigned
    /// workflow steps.
    #[default]
    Member,
}

impl Role {
    /// Returns the role name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Member => "member",
        }
    }

    /// Returns true if this role ranks at least as high as `required`.
    pub fn at_least(&self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (Role::Manager, Role::Manager | Role::Member) => true,
            (Role::Member, Role::Member) => true,
            _ => false,
        }
    }

    /// Returns the capability set granted by this role.
    pub fn capabilities(&self) -> HashSet<Capability> {
        match self {
            Role::Admin => Capability::all(),
            Role::Manager => {
                let mut caps = Capability::all();
                caps.remove(&Capability::OrgAdmin);
                caps
            }
            Role::Member => HashSet::from([
                Capability::PeopleRead,
                Capability::AssetsRead,
                Capability::SecurityRead,
                Capability::DocsRead,
                Capability::DocsAcknowledge,
                Capability::WorkflowsRead,
                Capability::WorkflowsWrite,
            ]),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "member" => Ok(Role::Member),
            _ => Err(()),
        }
    }
}

/// Authorization context for domain operations.
///
/// Carries identity and capability information through workflow
/// transitions and mutating operations for access control and audit
/// logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationContext {
    /// Unique identifier of the actor (user or service).
    pub actor_id: Uuid,
    /// Human-readable actor name for audit logs.
    pub actor_name: String,
    /// Organization the actor is acting within.
    pub organization_id: Uuid,
    /// The actor's role.
    pub role: Role,
    /// Capabilities granted to this actor.
    pub capabilities: HashSet<Capability>,
}

impl AuthorizationContext {
    /// Creates a context from a user.
    pub fn from_user(user: &User) -> Self {
        Self {
            actor_id: user.id,
            actor_name: user.display().to_string(),
            organization_id: user.organization_id,
            role: user.role,
            capabilities: user.role.capabilities(),
        }
    }

    /// Creates a system context for automated operations (device sync,
    /// CLI maintenance).
    pub fn system(organization_id: Uuid) -> Self {
        Self {
            actor_id: Uuid::nil(),
            actor_name: "system".to_string(),
            organization_id,
            role: Role::Admin,
            capabilities: Capability::all(),
        }
    }

    /// Checks a single capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Returns the actor identity string for audit logging.
    pub fn audit_identity(&self) -> String {
        format!("{}:{}", self.actor_id, self.actor_name)
    }
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization the user belongs to.
    pub organization_id: Uuid,
    /// Email address (unique per organization).
    pub email: String,
    /// Login name (unique per organization).
    pub username: String,
    /// Argon2id password hash. Empty for SSO-only accounts.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// RBAC role.
    pub role: Role,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Whether the account may sign in.
    pub enabled: bool,
    /// Identity provider subject for SSO-provisioned accounts.
    pub external_subject: Option<String>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a new enabled user with the given role.
    pub fn new(
        organization_id: Uuid,
        email: impl Into<String>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            email: email.into(),
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            display_name: None,
            enabled: true,
            external_subject: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name when set, otherwise the username.
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Checks whether the user's role grants a capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.role.capabilities().contains(&capability)
    }

    /// Checks whether the user's role ranks at least `required`.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.at_least(required)
    }
}

/// Filter for listing users.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Scope to an organization.
    pub organization_id: Option<Uuid>,
    /// Filter by role.
    pub role: Option<Role>,
    /// Filter by enabled state.
    pub enabled: Option<bool>,
    /// Substring match on username/email/display name.
    pub search: Option<String>,
}

/// Partial update for a user.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<Option<String>>,
    pub enabled: Option<bool>,
}

/// Session payload stored in the session cookie store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Authenticated user id.
    pub user_id: Uuid,
    /// Organization id at login time.
    pub organization_id: Uuid,
    /// Username for display without a lookup.
    pub username: String,
    /// When the session was established.
    pub logged_in_at: DateTime<Utc>,
}

impl SessionData {
    /// Creates session data for a user.
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            organization_id: user.organization_id,
            username: user.username.clone(),
            logged_in_at: Utc::now(),
        }
    }
}

/// Static prefix identifying Keel API keys.
pub const API_KEY_PREFIX: &str = "kl";

/// An API key for programmatic access.
///
/// Keys have the format `kl_<prefix>_<secret>`: a 6-character prefix
/// used for lookup and a 32-character secret. Only the SHA-256 hash of
/// the full key is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Human-readable key name.
    pub name: String,
    /// Lookup prefix (`kl_xxxxxx`).
    pub key_prefix: String,
    /// SHA-256 hash (hex) of the full key.
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// Capability strings this key is limited to (`*` for all).
    pub scopes: Vec<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last time the key authenticated a request.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Generates a new API key. Returns the record and the full key;
    /// the full key is shown once and never stored.
    pub fn generate(
        user_id: Uuid,
        organization_id: Uuid,
        name: impl Into<String>,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> (Self, String) {
        let prefix_part = random_token(6);
        let secret_part = random_token(32);
        let key_prefix = format!("{}_{}", API_KEY_PREFIX, prefix_part);
        let full_key = format!("{}_{}", key_prefix, secret_part);

        let record = Self {
            id: Uuid::new_v4(),
            user_id,
            organization_id,
            name: name.into(),
            key_prefix,
            key_hash: hash_key(&full_key),
            scopes,
            expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };

        (record, full_key)
    }

    /// Verifies a presented key against the stored hash.
    pub fn verify(&self, presented: &str) -> bool {
        use subtle::ConstantTimeEq;
        hash_key(presented)
            .as_bytes()
            .ct_eq(self.key_hash.as_bytes())
            .into()
    }

    /// Returns true if the key has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }

    /// Checks whether the key grants a capability string.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == scope)
    }
}

/// Hashes a full API key for storage/lookup comparison.
fn hash_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a random lowercase alphanumeric token.
fn random_token(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Admin.at_least(Role::Manager));
        assert!(Role::Admin.at_least(Role::Member));
        assert!(Role::Manager.at_least(Role::Member));
        assert!(!Role::Manager.at_least(Role::Admin));
        assert!(!Role::Member.at_least(Role::Manager));
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.capabilities().contains(&Capability::OrgAdmin));
        assert!(!Role::Manager.capabilities().contains(&Capability::OrgAdmin));
        assert!(Role::Manager
            .capabilities()
            .contains(&Capability::AssetsWrite));

        let member = Role::Member.capabilities();
        assert!(member.contains(&Capability::DocsAcknowledge));
        assert!(member.contains(&Capability::WorkflowsWrite));
        assert!(!member.contains(&Capability::AssetsWrite));
        assert!(!member.contains(&Capability::PeopleWrite));
    }

    #[test]
    fn test_capability_string_round_trip() {
        for cap in Capability::all() {
            let parsed: Capability = cap.as_str().parse().unwrap();
            assert_eq!(parsed, cap);
        }
        assert!("people:delete".parse::<Capability>().is_err());
    }

    #[test]
    fn test_authorization_context_from_user() {
        let org_id = Uuid::new_v4();
        let user = User::new(org_id, "a@example.com", "alice", "hash", Role::Manager);
        let ctx = AuthorizationContext::from_user(&user);
        assert_eq!(ctx.actor_id, user.id);
        assert_eq!(ctx.organization_id, org_id);
        assert!(ctx.has_capability(Capability::WorkflowsWrite));
        assert!(!ctx.has_capability(Capability::OrgAdmin));
    }

    #[test]
    fn test_system_context() {
        let org_id = Uuid::new_v4();
        let ctx = AuthorizationContext::system(org_id);
        assert_eq!(ctx.actor_id, Uuid::nil());
        assert_eq!(ctx.actor_name, "system");
        assert!(ctx.has_capability(Capability::OrgAdmin));
        assert!(ctx.audit_identity().ends_with(":system"));
    }

    #[test]
    fn test_user_display() {
        let mut user = User::new(Uuid::new_v4(), "a@b.c", "alice", "h", Role::Member);
        assert_eq!(user.display(), "alice");
        user.display_name = Some("Alice A.".to_string());
        assert_eq!(user.display(), "Alice A.");
    }

    #[test]
    fn test_api_key_generation_and_verify() {
        let (key, full) = ApiKey::generate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ci",
            vec!["assets:read".to_string()],
            None,
        );

        assert!(full.starts_with("kl_"));
        assert_eq!(full.splitn(3, '_').count(), 3);
        assert!(key.verify(&full));
        assert!(!key.verify("kl_aaaaaa_wrong"));
        assert!(!key.is_expired());
    }

    #[test]
    fn test_api_key_scopes() {
        let (key, _) = ApiKey::generate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "scoped",
            vec!["assets:read".to_string(), "assets:write".to_string()],
            None,
        );
        assert!(key.has_scope("assets:read"));
        assert!(!key.has_scope("docs:write"));

        let (wildcard, _) = ApiKey::generate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "all",
            vec!["*".to_string()],
            None,
        );
        assert!(wildcard.has_scope("docs:write"));
    }

    #[test]
    fn test_api_key_expiry() {
        let (mut key, _) = ApiKey::generate(Uuid::new_v4(), Uuid::new_v4(), "old", vec![], None);
        key.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(key.is_expired());
    }

    #[test]
    fn test_session_data_for_user() {
        let user = User::new(Uuid::new_v4(), "a@b.c", "alice", "h", Role::Member);
        let session = SessionData::for_user(&user);
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.organization_id, user.organization_id);
        assert_eq!(session.username, "alice");
    }
}
