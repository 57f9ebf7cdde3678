//! Roles, the administrator allow-list, and the permission table.
//!
//! Roles are derived, never stored on the account: the resolver maps
//! allow-listed emails to [`Role::Administrator`] and every other verified
//! account to a [`Role::Client`] scoped to its tenant. Authorization then
//! asks two separate questions on every request: may this role perform the
//! action, and may this subject see this tenant's data. The second check is
//! the one choke point for tenant isolation, so resource handlers never
//! compare tenant ids themselves.

use crate::auth::VerifiedIdentity;
use crate::directory::normalize_email;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Firm operators; see every tenant.
    Administrator,
    /// Firm employees assigned to particular tenants. Not minted by the
    /// login path today; sessions carry it for the staff-assignment flow.
    Staff,
    /// A tenant's own person; confined to that tenant.
    Client,
}

/// Everything an action can be gated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewCases,
    ViewDocuments,
    DownloadDocuments,
    ViewInvoices,
    ViewMessages,
    SendMessage,
    UpdateOwnProfile,
    UpdateCaseStatus,
    ManageAccounts,
}

/// Role plus the tenant it is confined to, as minted at login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleAssignment {
    pub role: Role,
    /// `None` means unscoped (administrators).
    pub tenant_scope: Option<Uuid>,
}

/// Maps verified identities to roles.
pub struct RoleResolver {
    admin_emails: HashSet<String>,
}

impl RoleResolver {
    /// Build from the configured administrator allow-list; entries are
    /// normalized the same way login identifiers are.
    #[must_use]
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            admin_emails: allow_list
                .into_iter()
                .map(|email| normalize_email(email.as_ref()))
                .collect(),
        }
    }

    /// Resolve the role for a verified identity. Taking [`VerifiedIdentity`]
    /// rather than a bare email is deliberate: only the verifier constructs
    /// one, so client-supplied data can never reach this mapping.
    #[must_use]
    pub fn resolve(&self, identity: &VerifiedIdentity) -> RoleAssignment {
        if self.admin_emails.contains(&identity.email) {
            RoleAssignment {
                role: Role::Administrator,
                tenant_scope: None,
            }
        } else {
            RoleAssignment {
                role: Role::Client,
                tenant_scope: Some(identity.tenant_id),
            }
        }
    }
}

/// Static role-to-action grants.
pub struct PermissionTable {
    grants: HashMap<Role, HashSet<Action>>,
}

impl PermissionTable {
    /// The portal's standard grants. Administrators hold a strict superset
    /// of every other role.
    #[must_use]
    pub fn defaults() -> Self {
        use Action::{
            DownloadDocuments, ManageAccounts, SendMessage, UpdateCaseStatus, UpdateOwnProfile,
            ViewCases, ViewDocuments, ViewInvoices, ViewMessages,
        };
        let client = HashSet::from([
            ViewCases,
            ViewDocuments,
            DownloadDocuments,
            ViewInvoices,
            ViewMessages,
            SendMessage,
            UpdateOwnProfile,
        ]);
        let staff = HashSet::from([
            ViewCases,
            ViewDocuments,
            DownloadDocuments,
            ViewInvoices,
            ViewMessages,
            SendMessage,
            UpdateCaseStatus,
        ]);
        let administrator = client
            .union(&staff)
            .copied()
            .chain([ManageAccounts])
            .collect();
        Self {
            grants: HashMap::from([
                (Role::Administrator, administrator),
                (Role::Staff, staff),
                (Role::Client, client),
            ]),
        }
    }

    /// May `role` perform `action`? Unknown pairs answer no.
    #[must_use]
    pub fn can(&self, role: Role, action: Action) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|granted| granted.contains(&action))
    }

    /// May a subject with `role` and `tenant_scope` touch `target_tenant`'s
    /// data? Every tenant-owned resource read goes through here. Like
    /// [`Self::can`], a role with no entry in the table gets nothing.
    #[must_use]
    pub fn can_access_tenant(
        &self,
        role: Role,
        tenant_scope: Option<Uuid>,
        target_tenant: Uuid,
    ) -> bool {
        if !self.grants.contains_key(&role) {
            return false;
        }
        role == Role::Administrator || tenant_scope == Some(target_tenant)
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::defaults()
    }
}
