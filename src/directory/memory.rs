//! In-process directory for tests and seeded demos.

use super::{AccountRecord, Directory, TenantRecord, normalize_email};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryDirectory {
    accounts: Mutex<HashMap<Uuid, AccountRecord>>,
    tenants: Mutex<HashMap<Uuid, TenantRecord>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, registry_code: Option<&str>) -> Uuid {
        let tenant_id = Uuid::new_v4();
        let mut tenants = self.tenants.lock().await;
        tenants.insert(
            tenant_id,
            TenantRecord {
                tenant_id,
                registry_code: registry_code.map(ToString::to_string),
            },
        );
        tenant_id
    }

    /// Insert an enabled account with clean bookkeeping. The email is
    /// normalized on the way in, mirroring what provisioning does.
    pub async fn insert_account(&self, email: &str, password_hash: &str, tenant_id: Uuid) -> Uuid {
        let account_id = Uuid::new_v4();
        let mut accounts = self.accounts.lock().await;
        accounts.insert(
            account_id,
            AccountRecord {
                account_id,
                email: normalize_email(email),
                password_hash: password_hash.to_string(),
                tenant_id,
                enabled: true,
                failed_attempts: 0,
                locked_until: None,
                last_login_at: None,
            },
        );
        account_id
    }

    pub async fn set_enabled(&self, account_id: Uuid, enabled: bool) {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(&account_id) {
            account.enabled = enabled;
        }
    }

    /// Snapshot one account, for assertions on bookkeeping fields.
    pub async fn account(&self, account_id: Uuid) -> Option<AccountRecord> {
        let accounts = self.accounts.lock().await;
        accounts.get(&account_id).cloned()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>> {
        let tenants = self.tenants.lock().await;
        Ok(tenants.get(&tenant_id).cloned())
    }

    async fn register_failed_attempt(&self, account_id: Uuid) -> Result<u32> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("account {account_id} not found"))?;
        account.failed_attempts += 1;
        Ok(account.failed_attempts)
    }

    async fn set_lockout(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("account {account_id} not found"))?;
        account.locked_until = Some(until);
        Ok(())
    }

    async fn record_login_success(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("account {account_id} not found"))?;
        account.failed_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(at);
        Ok(())
    }
}
