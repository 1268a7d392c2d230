use std::sync::Arc;
use std::time::Duration;

use examdesk_cache::Outcome;
use examdesk_storage::{DynDocumentStore, Filter, ObjectId, RequestContext};
use time::OffsetDateTime;

use super::{AccountCache, CachedCollection, Lookup};
use crate::error::AccountError;
use crate::models::{NewUser, User, UserUpdate, from_document, to_document};
use crate::password::{CredentialHasher, validate_password};

const COLLECTION: &str = "users";
const ENTITY: &str = "user";

/// Default freshness window for cached users.
pub const DEFAULT_USER_TTL: Duration = Duration::from_secs(15 * 60);

fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

fn oid_key(hex: &str) -> String {
    format!("user:oid:{hex}")
}

/// Staff accounts over the `users` collection.
#[derive(Clone)]
pub struct UserRepository {
    inner: CachedCollection,
    hasher: Arc<CredentialHasher>,
}

impl std::fmt::Debug for UserRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRepository")
            .field("cached", &self.inner.cache.is_some())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl UserRepository {
    pub fn new(
        store: DynDocumentStore,
        cache: AccountCache,
        ttl: Duration,
        hasher: Arc<CredentialHasher>,
    ) -> Self {
        Self {
            inner: CachedCollection {
                entity: ENTITY,
                collection: COLLECTION,
                store,
                cache,
                ttl,
            },
            hasher,
        }
    }

    pub async fn ensure_indexes(&self) -> Result<(), AccountError> {
        for field in ["user_id", "email"] {
            self.inner
                .store
                .ensure_unique_index(COLLECTION, field)
                .await
                .map_err(AccountError::Storage)?;
        }
        Ok(())
    }

    /// Inserts a new user. Without an explicit `user_id` the hex form of the
    /// generated identifier is used.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: NewUser,
    ) -> Result<Outcome<User>, AccountError> {
        input.validate()?;
        validate_password(&input.password)?;
        let password_hash = self.hasher.hash_async(&input.password).await?;

        let id = ObjectId::new();
        let now = OffsetDateTime::now_utc();
        let user = User {
            id,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            email: input.email.trim().to_string(),
            phone: input.phone.trim().to_string(),
            role: input.role,
            user_id: input
                .user_id
                .map(|u| u.trim().to_string())
                .unwrap_or_else(|| id.to_hex()),
            password_hash,
            created_at: now,
            updated_at: now,
        };

        let doc = to_document(&user)?;
        self.inner
            .bounded(ctx, self.inner.store.insert_one(COLLECTION, doc))
            .await?;
        tracing::info!(user_id = %user.user_id, role = ?user.role, "user created");

        // Cache under the key `get` will use for this user id.
        let key = match Lookup::parse(&user.user_id) {
            Lookup::Internal(_) => oid_key(&user.id.to_hex()),
            Lookup::Natural(user_id) => user_key(&user_id),
        };
        let failure = self.inner.populate(ctx, &key, &user).await;
        Ok(Outcome::stored(user).with_failures(failure))
    }

    /// Looks a user up by internal identifier if `id` parses as one, by
    /// `user_id` otherwise.
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Outcome<User>, AccountError> {
        match Lookup::parse(id) {
            Lookup::Internal(oid) => {
                let hex = oid.to_hex();
                self.inner
                    .find(ctx, oid_key(&hex), Filter::by_id(oid), hex)
                    .await
            }
            Lookup::Natural(user_id) => {
                self.inner
                    .find(
                        ctx,
                        user_key(&user_id),
                        Filter::eq("user_id", user_id.as_str()),
                        user_id,
                    )
                    .await
            }
        }
    }

    fn filter_for(id: &str) -> Filter {
        match Lookup::parse(id) {
            Lookup::Internal(oid) => Filter::by_id(oid),
            Lookup::Natural(user_id) => Filter::eq("user_id", user_id),
        }
    }

    fn keys_for(user: &User) -> Vec<String> {
        vec![user_key(&user.user_id), oid_key(&user.id.to_hex())]
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        update: UserUpdate,
    ) -> Result<Outcome<User>, AccountError> {
        let set = update.into_set(OffsetDateTime::now_utc())?;
        let before = self
            .inner
            .bounded(
                ctx,
                self.inner
                    .store
                    .find_one_and_update(COLLECTION, &Self::filter_for(id), set.clone()),
            )
            .await?
            .ok_or_else(|| AccountError::not_found(ENTITY, id))?;

        let mut after = before.clone();
        after.extend(set);
        let before: User = from_document(before)?;
        let after: User = from_document(after)?;

        let failures = self.inner.invalidate(ctx, &Self::keys_for(&before)).await;
        Ok(Outcome::stored(after).with_failures(failures))
    }

    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<Outcome<User>, AccountError> {
        let removed = self
            .inner
            .bounded(
                ctx,
                self.inner
                    .store
                    .find_one_and_delete(COLLECTION, &Self::filter_for(id)),
            )
            .await?
            .ok_or_else(|| AccountError::not_found(ENTITY, id))?;
        let removed: User = from_document(removed)?;
        tracing::info!(user_id = %removed.user_id, "user deleted");

        let failures = self.inner.invalidate(ctx, &Self::keys_for(&removed)).await;
        Ok(Outcome::stored(removed).with_failures(failures))
    }

    /// Checks a user's password. Any failure is `InvalidCredentials`.
    pub async fn verify_password(
        &self,
        ctx: &RequestContext,
        id: &str,
        password: &str,
    ) -> Result<User, AccountError> {
        let user = match self.get(ctx, id).await {
            Ok(outcome) => outcome.value,
            Err(e) if e.is_not_found() => {
                self.hasher.verify_dummy_async(password).await;
                return Err(AccountError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        let matches = if user.password_hash.is_empty() {
            self.hasher.verify_dummy_async(password).await
        } else {
            self.hasher.verify_async(password, &user.password_hash).await
        };
        if !matches {
            return Err(AccountError::InvalidCredentials);
        }
        Ok(user)
    }
}
