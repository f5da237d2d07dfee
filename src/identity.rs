//! Identity Resolver: from verified token claims to either a
//! user-identity-with-derived-license or a license directly.

use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::db::licenses::NewLicense;
use crate::db::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::models::{License, LicenseStatus, Principal};
use crate::quota::QuotaEngine;
use crate::tokens::Claims;
use chrono::Duration;
use std::sync::Arc;

pub struct IdentityResolver {
    db: Arc<Database>,
    quota: Arc<QuotaEngine>,
    clock: Arc<dyn Clock>,
    quota_defaults: QuotaConfig,
}

impl IdentityResolver {
    pub fn new(db: Arc<Database>, quota: Arc<QuotaEngine>, clock: Arc<dyn Clock>, quota_defaults: QuotaConfig) -> Self {
        Self { db, quota, clock, quota_defaults }
    }

    pub async fn resolve(&self, claims: Claims) -> QuotaResult<Principal> {
        match claims {
            Claims::User(user_claims) => {
                let user = self.db.get_user(&user_claims.user_id).await?;
                if !user.is_active {
                    return Err(QuotaError::Authentication("user account is inactive".into()));
                }
                let tenant_id = format!("user_{}", user.username);
                let license = self.get_or_create_derived_license(&tenant_id, &user.username).await?;
                Ok(Principal::User { user, license })
            }
            Claims::License(license_claims) => {
                let license = self
                    .db
                    .get_license_by_tenant(&license_claims.tenant_id)
                    .await?
                    .ok_or_else(|| QuotaError::NotFound(format!("no license for tenant {}", license_claims.tenant_id)))?;
                self.validate_status(&license)?;
                Ok(Principal::License(license))
            }
        }
    }

    fn validate_status(&self, license: &License) -> QuotaResult<()> {
        let now = self.clock.now_utc();
        match license.effective_status(now) {
            LicenseStatus::Active => Ok(()),
            LicenseStatus::Suspended => Err(QuotaError::Authentication("license is suspended".into())),
            LicenseStatus::Expired => Err(QuotaError::Authentication("license has expired".into())),
            LicenseStatus::Revoked => Err(QuotaError::Authentication("license is revoked".into())),
        }
        .and_then(|_| {
            if now < license.valid_from {
                Err(QuotaError::Authentication("license is not yet valid".into()))
            } else {
                Ok(())
            }
        })
    }

    /// Idempotent: the uniqueness constraint on `tenant_id` plus a
    /// retry-on-conflict read guards against two concurrent first-use
    /// requests minting two licenses for the same user (P6).
    async fn get_or_create_derived_license(&self, tenant_id: &str, username: &str) -> QuotaResult<License> {
        if let Some(license) = self.db.get_license_by_tenant(tenant_id).await? {
            return Ok(license);
        }

        let now = self.clock.now_utc();
        let draft = NewLicense {
            tenant_id: tenant_id.to_string(),
            tenant_name: format!("Default license for {username}"),
            max_apps: self.quota_defaults.default_max_apps,
            max_executions_per_24h: self.quota_defaults.default_max_executions_per_24h,
            valid_from: now,
            valid_to: now + Duration::days(self.quota_defaults.default_license_validity_days),
            features: "{}".to_string(),
            contact_name: None,
            contact_email: None,
        };

        match self.db.create_license(draft, "system", now).await {
            Ok(license) => {
                self.quota.set_app_count(tenant_id, 0).await?;
                Ok(license)
            }
            Err(QuotaError::Conflict(_)) => {
                // Lost the creation race; read back the winner's row.
                self.db
                    .get_license_by_tenant(tenant_id)
                    .await?
                    .ok_or_else(|| QuotaError::Internal("derived license vanished after conflict".into()))
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::users::NewUser;
    use crate::kv::memory_store::MemoryStore;
    use chrono::Utc;

    async fn resolver() -> (IdentityResolver, Arc<Database>) {
        let db = Arc::new(Database::in_memory_for_tests().await.unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let quota = Arc::new(QuotaEngine::new(Arc::new(MemoryStore::new()), clock.clone() as Arc<dyn Clock>));
        (
            IdentityResolver::new(db.clone(), quota, clock.clone(), QuotaConfig::default()),
            db,
        )
    }

    #[tokio::test]
    async fn derives_default_license_on_first_use() {
        let (resolver, db) = resolver().await;
        let user = db
            .create_user(
                NewUser {
                    username: "alice".into(),
                    email: "alice@example.com".into(),
                    password_hash: "hash".into(),
                    first_name: None,
                    last_name: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let principal = resolver
            .resolve(Claims::User(crate::tokens::UserClaims {
                user_id: user.id.clone(),
                username: user.username.clone(),
                email: user.email.clone(),
                iat: 0,
                exp: 0,
            }))
            .await
            .unwrap();

        match principal {
            Principal::User { license, .. } => {
                assert_eq!(license.tenant_id, "user_alice");
                assert_eq!(license.max_apps, 10);
            }
            Principal::License(_) => panic!("expected user principal"),
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_derives_exactly_one_license() {
        let (resolver, db) = resolver().await;
        let user = db
            .create_user(
                NewUser {
                    username: "bob".into(),
                    email: "bob@example.com".into(),
                    password_hash: "hash".into(),
                    first_name: None,
                    last_name: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let resolver = Arc::new(resolver);
        let claims = Claims::User(crate::tokens::UserClaims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            iat: 0,
            exp: 0,
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let claims = claims.clone();
            handles.push(tokio::spawn(async move { resolver.resolve(claims).await.unwrap() }));
        }

        let mut license_ids = std::collections::HashSet::new();
        for handle in handles {
            match handle.await.unwrap() {
                Principal::User { license, .. } => {
                    license_ids.insert(license.id);
                }
                Principal::License(_) => panic!("expected user principal"),
            }
        }
        assert_eq!(license_ids.len(), 1);
    }
}
