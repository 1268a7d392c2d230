use std::sync::Arc;
use std::time::Duration;

use examdesk_cache::Outcome;
use examdesk_storage::{Document, DynDocumentStore, Filter, ObjectId, RequestContext};
use time::OffsetDateTime;

use super::{AccountCache, CachedCollection, Lookup};
use crate::error::AccountError;
use crate::models::{NewStudent, STUDENT_ROLE, Student, StudentUpdate, from_document, to_document};
use crate::password::{CredentialHasher, validate_password};

const COLLECTION: &str = "students";
const ENTITY: &str = "student";

/// Default freshness window for cached students.
pub const DEFAULT_STUDENT_TTL: Duration = Duration::from_secs(5 * 60);

fn student_key(student_id: &str) -> String {
    format!("student:{student_id}")
}

fn email_key(email: &str) -> String {
    format!("student:email:{email}")
}

fn oid_key(hex: &str) -> String {
    format!("student:oid:{hex}")
}

/// Every cache key under which `student` may be stored.
fn keys_for(student: &Student) -> Vec<String> {
    vec![
        student_key(&student.student_id),
        email_key(&student.email),
        oid_key(&student.id.to_hex()),
    ]
}

/// Student accounts over the `students` collection.
#[derive(Clone)]
pub struct StudentRepository {
    inner: CachedCollection,
    hasher: Arc<CredentialHasher>,
}

impl std::fmt::Debug for StudentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudentRepository")
            .field("cached", &self.inner.cache.is_some())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl StudentRepository {
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

    /// Declares the unique indexes on `student_id` and `email`.
    pub async fn ensure_indexes(&self) -> Result<(), AccountError> {
        for field in ["student_id", "email"] {
            self.inner
                .store
                .ensure_unique_index(COLLECTION, field)
                .await
                .map_err(AccountError::Storage)?;
        }
        Ok(())
    }

    /// Validates, hashes and inserts a new student, then caches it under its
    /// student id.
    ///
    /// # Errors
    ///
    /// `InvalidInput`/`WeakPassword` before anything is written, `AlreadyExists`
    /// when the student id or email is taken.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: NewStudent,
    ) -> Result<Outcome<Student>, AccountError> {
        input.validate()?;
        validate_password(&input.password)?;
        let password_hash = self.hasher.hash_async(&input.password).await?;

        let now = OffsetDateTime::now_utc();
        let mut student = Student {
            id: ObjectId::new(),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            role: STUDENT_ROLE.to_string(),
            department: input
                .department
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            student_id: input.student_id.trim().to_string(),
            email: input.email.trim().to_string(),
            password_hash,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
            required_exams: Vec::new(),
            completed_exams: Vec::new(),
        };

        let doc = to_document(&student)?;
        student.id = self
            .inner
            .bounded(ctx, self.inner.store.insert_one(COLLECTION, doc))
            .await?;
        tracing::info!(student_id = %student.student_id, id = %student.id, "student created");

        let mut outcome = Outcome::stored(student);
        let key = student_key(&outcome.value.student_id);
        if let Some(failure) = self.inner.populate(ctx, &key, &outcome.value).await {
            outcome.push_failure(failure);
        }
        Ok(outcome)
    }

    /// Looks a student up by student id.
    pub async fn get_by_student_id(
        &self,
        ctx: &RequestContext,
        student_id: &str,
    ) -> Result<Outcome<Student>, AccountError> {
        self.inner
            .find(
                ctx,
                student_key(student_id),
                Filter::eq("student_id", student_id),
                student_id.to_string(),
            )
            .await
    }

    /// Looks a student up by email.
    pub async fn get_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Outcome<Student>, AccountError> {
        self.inner
            .find(ctx, email_key(email), Filter::eq("email", email), email.to_string())
            .await
    }

    /// Looks a student up by internal identifier if `id` parses as one, by
    /// student id otherwise.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Outcome<Student>, AccountError> {
        match Lookup::parse(id) {
            Lookup::Internal(oid) => {
                let hex = oid.to_hex();
                self.inner
                    .find(ctx, oid_key(&hex), Filter::by_id(oid), hex)
                    .await
            }
            Lookup::Natural(student_id) => self.get_by_student_id(ctx, &student_id).await,
        }
    }

    fn filter_for(id: &str) -> Filter {
        match Lookup::parse(id) {
            Lookup::Internal(oid) => Filter::by_id(oid),
            Lookup::Natural(student_id) => Filter::eq("student_id", student_id),
        }
    }

    /// Applies a partial update and invalidates every cache key of the student.
    ///
    /// Returns the updated student as written.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        update: StudentUpdate,
    ) -> Result<Outcome<Student>, AccountError> {
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
        let before: Student = from_document(before)?;
        let after: Student = from_document(after)?;

        let mut keys = keys_for(&before);
        if after.email != before.email {
            keys.push(email_key(&after.email));
        }
        let failures = self.inner.invalidate(ctx, &keys).await;
        Ok(Outcome::stored(after).with_failures(failures))
    }

    /// Removes a student and invalidates its cache keys.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matched.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Outcome<Student>, AccountError> {
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
        let removed: Student = from_document(removed)?;
        tracing::info!(student_id = %removed.student_id, "student deleted");

        let failures = self.inner.invalidate(ctx, &keys_for(&removed)).await;
        Ok(Outcome::stored(removed).with_failures(failures))
    }

    /// Checks a student's password.
    ///
    /// Unknown student, wrong password, missing hash and deactivated account all
    /// yield the same `InvalidCredentials`, and each path performs one hash
    /// verification. Document-store failures are returned as such.
    pub async fn verify_password(
        &self,
        ctx: &RequestContext,
        student_id: &str,
        password: &str,
    ) -> Result<Student, AccountError> {
        let student = match self.get_by_student_id(ctx, student_id).await {
            Ok(outcome) => outcome.value,
            Err(e) if e.is_not_found() => {
                self.hasher.verify_dummy_async(password).await;
                return Err(AccountError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        let matches = if student.password_hash.is_empty() {
            self.hasher.verify_dummy_async(password).await
        } else {
            self.hasher.verify_async(password, &student.password_hash).await
        };
        if !matches || !student.is_active {
            tracing::debug!(student_id = %student_id, "credential check failed");
            return Err(AccountError::InvalidCredentials);
        }
        Ok(student)
    }

    /// Replaces a student's password after checking the credential policy.
    pub async fn reset_password(
        &self,
        ctx: &RequestContext,
        student_id: &str,
        new_password: &str,
    ) -> Result<Outcome<()>, AccountError> {
        validate_password(new_password)?;
        let hash = self.hasher.hash_async(new_password).await?;
        let mut set = Document::new();
        set.insert("password_hash".into(), hash.into());
        self.write_and_invalidate(ctx, student_id, set).await
    }

    /// Stamps `last_login` with the current time.
    pub async fn record_login(
        &self,
        ctx: &RequestContext,
        student_id: &str,
    ) -> Result<Outcome<()>, AccountError> {
        let set = to_document(&LoginStamp {
            last_login: OffsetDateTime::now_utc(),
        })?;
        self.write_and_invalidate(ctx, student_id, set).await
    }

    async fn write_and_invalidate(
        &self,
        ctx: &RequestContext,
        student_id: &str,
        set: Document,
    ) -> Result<Outcome<()>, AccountError> {
        let before = self
            .inner
            .bounded(
                ctx,
                self.inner.store.find_one_and_update(
                    COLLECTION,
                    &Filter::eq("student_id", student_id),
                    set,
                ),
            )
            .await?
            .ok_or_else(|| AccountError::not_found(ENTITY, student_id))?;
        let before: Student = from_document(before)?;
        let failures = self.inner.invalidate(ctx, &keys_for(&before)).await;
        Ok(Outcome::stored(()).with_failures(failures))
    }
}

#[derive(serde::Serialize)]
struct LoginStamp {
    #[serde(with = "time::serde::rfc3339")]
    last_login: OffsetDateTime,
}
