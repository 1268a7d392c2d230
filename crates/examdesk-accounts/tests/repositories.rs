use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use examdesk_accounts::{
    AccountCache, AccountError, CredentialHasher, NewStudent, NewUser, StudentRepository,
    StudentUpdate, UserRepository, UserRole, UserUpdate,
};
use examdesk_cache::{
    CacheAside, CacheBackend, CacheError, CacheOp, CacheStore, LocalCacheBackend, Source,
};
use examdesk_db_memory::InMemoryDocumentStore;
use examdesk_storage::{
    Document, DocumentStore, DynDocumentStore, Filter, Interrupted, ObjectId, RequestContext,
    StorageError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_secs(60);

struct BrokenBackend;

#[async_trait]
impl CacheBackend for BrokenBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::store("connection refused"))
    }
    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::store("connection refused"))
    }
    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Err(CacheError::store("connection refused"))
    }
    async fn flush_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Err(CacheError::store("connection refused"))
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::store("connection refused"))
    }
    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(Duration::from_secs(5))
}

fn hasher() -> Arc<CredentialHasher> {
    Arc::new(CredentialHasher::with_params(1024, 1, 1).unwrap())
}

fn cache_over(backend: Arc<dyn CacheBackend>) -> AccountCache {
    let store = CacheStore::new(backend, "examdesk-test", Duration::from_secs(1)).unwrap();
    Some(CacheAside::new(Arc::new(store)))
}

async fn students(cache: AccountCache) -> StudentRepository {
    let store: DynDocumentStore = Arc::new(InMemoryDocumentStore::new());
    let repo = StudentRepository::new(store, cache, TTL, hasher());
    repo.ensure_indexes().await.unwrap();
    repo
}

async fn users(cache: AccountCache) -> UserRepository {
    let store: DynDocumentStore = Arc::new(InMemoryDocumentStore::new());
    let repo = UserRepository::new(store, cache, TTL, hasher());
    repo.ensure_indexes().await.unwrap();
    repo
}

fn new_student(student_id: &str, email: &str) -> NewStudent {
    NewStudent {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        department: Some("math".into()),
        student_id: student_id.into(),
        email: email.into(),
        password: "Abcdef12".into(),
    }
}

#[tokio::test]
async fn test_create_then_read_from_cache() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    let created = repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    assert!(created.cache_failures.is_empty());
    assert_eq!(created.value.role, "student");
    assert!(created.value.is_active);
    assert!(created.value.password_hash.starts_with("$argon2id$"));

    let read = repo.get_by_student_id(&ctx(), "S1").await.unwrap();
    assert_eq!(read.source, Source::Cache);
    assert_eq!(read.value, created.value);

    let by_oid = repo.get(&ctx(), &created.value.id.to_hex()).await.unwrap();
    assert_eq!(by_oid.source, Source::Store);
    assert_eq!(by_oid.value, created.value);

    let by_email = repo.get_by_email(&ctx(), "a@x.com").await.unwrap();
    assert_eq!(by_email.value.student_id, "S1");
}

#[tokio::test]
async fn test_update_visible_after_cached_read() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    let created = repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    let oid = created.value.id.to_hex();

    // Warm every key.
    repo.get(&ctx(), &oid).await.unwrap();
    repo.get(&ctx(), "S1").await.unwrap();
    repo.get_by_email(&ctx(), "a@x.com").await.unwrap();

    let updated = repo
        .update(
            &ctx(),
            "S1",
            StudentUpdate {
                department: Some("physics".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.value.department.as_deref(), Some("physics"));
    assert!(updated.value.updated_at >= created.value.updated_at);

    for read in [
        repo.get(&ctx(), &oid).await.unwrap(),
        repo.get(&ctx(), "S1").await.unwrap(),
        repo.get_by_email(&ctx(), "a@x.com").await.unwrap(),
    ] {
        assert_eq!(read.source, Source::Store);
        assert_eq!(read.value.department.as_deref(), Some("physics"));
    }
}

#[tokio::test]
async fn test_email_change_drops_old_email_key() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    repo.get_by_email(&ctx(), "a@x.com").await.unwrap();

    repo.update(
        &ctx(),
        "S1",
        StudentUpdate {
            email: Some("b@x.com".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = repo.get_by_email(&ctx(), "a@x.com").await.unwrap_err();
    assert!(err.is_not_found());
    let read = repo.get_by_email(&ctx(), "b@x.com").await.unwrap();
    assert_eq!(read.value.student_id, "S1");
}

#[tokio::test]
async fn test_delete_then_read_not_found() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    let created = repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    let oid = created.value.id.to_hex();
    repo.get(&ctx(), &oid).await.unwrap();
    repo.get(&ctx(), "S1").await.unwrap();

    let removed = repo.delete(&ctx(), "S1").await.unwrap();
    assert_eq!(removed.value.id, created.value.id);

    assert!(repo.get(&ctx(), "S1").await.unwrap_err().is_not_found());
    assert!(repo.get(&ctx(), &oid).await.unwrap_err().is_not_found());
    assert!(repo.delete(&ctx(), "S1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_identifier_precedence_has_no_fallback() {
    let repo = students(None).await;
    // A natural key that happens to look like an internal identifier.
    let lookalike = ObjectId::new().to_hex();
    repo.create(&ctx(), new_student(&lookalike, "a@x.com")).await.unwrap();

    let err = repo.get(&ctx(), &lookalike).await.unwrap_err();
    assert!(err.is_not_found());
    let read = repo.get_by_student_id(&ctx(), &lookalike).await.unwrap();
    assert_eq!(read.value.student_id, lookalike);
}

#[tokio::test]
async fn test_verify_password_and_deactivation() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();

    let student = repo.verify_password(&ctx(), "S1", "Abcdef12").await.unwrap();
    assert_eq!(student.email, "a@x.com");

    let err = repo.verify_password(&ctx(), "S1", "wrong").await.unwrap_err();
    assert_eq!(err, AccountError::InvalidCredentials);
    let err = repo.verify_password(&ctx(), "S2", "Abcdef12").await.unwrap_err();
    assert_eq!(err, AccountError::InvalidCredentials);

    repo.update(
        &ctx(),
        "S1",
        StudentUpdate {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = repo.verify_password(&ctx(), "S1", "Abcdef12").await.unwrap_err();
    assert_eq!(err, AccountError::InvalidCredentials);
    let read = repo.get(&ctx(), "S1").await.unwrap();
    assert!(!read.value.is_active);
}

#[tokio::test]
async fn test_reset_password_and_record_login() {
    let repo = students(cache_over(Arc::new(LocalCacheBackend::new()))).await;
    repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    repo.verify_password(&ctx(), "S1", "Abcdef12").await.unwrap();

    let err = repo.reset_password(&ctx(), "S1", "short").await.unwrap_err();
    assert!(matches!(err, AccountError::WeakPassword { .. }));

    repo.reset_password(&ctx(), "S1", "Newpass99").await.unwrap();
    assert!(repo.verify_password(&ctx(), "S1", "Abcdef12").await.is_err());
    repo.verify_password(&ctx(), "S1", "Newpass99").await.unwrap();

    assert!(repo.get(&ctx(), "S1").await.unwrap().value.last_login.is_none());
    repo.record_login(&ctx(), "S1").await.unwrap();
    assert!(repo.get(&ctx(), "S1").await.unwrap().value.last_login.is_some());

    let err = repo.record_login(&ctx(), "nobody").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_duplicates_rejected() {
    let repo = students(None).await;
    repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();

    let err = repo
        .create(&ctx(), new_student("S1", "other@x.com"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AccountError::AlreadyExists {
            entity: "student",
            field: "student_id".into()
        }
    );

    let err = repo.create(&ctx(), new_student("S2", "a@x.com")).await.unwrap_err();
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn test_validation_happens_before_write() {
    let repo = students(None).await;
    let mut input = new_student("S1", "a@x.com");
    input.password = "abcdefgh".into();
    let err = repo.create(&ctx(), input).await.unwrap_err();
    assert!(matches!(err, AccountError::WeakPassword { .. }));

    let err = repo.create(&ctx(), new_student("S1", "nope")).await.unwrap_err();
    assert!(matches!(err, AccountError::InvalidInput { .. }));

    assert!(repo.get(&ctx(), "S1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_works_without_cache() {
    let repo = students(None).await;
    let created = repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    assert!(created.cache_failures.is_empty());

    let first = repo.get(&ctx(), "S1").await.unwrap();
    let second = repo.get(&ctx(), "S1").await.unwrap();
    assert_eq!(first.source, Source::Store);
    assert_eq!(second.source, Source::Store);
    assert_eq!(second.value, created.value);
}

#[tokio::test]
async fn test_broken_cache_degrades() {
    let repo = students(cache_over(Arc::new(BrokenBackend))).await;

    let created = repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();
    assert_eq!(created.cache_failures.len(), 1);
    assert_eq!(created.cache_failures[0].op, CacheOp::Set);
    assert_eq!(created.cache_failures[0].key, "student:S1");

    let read = repo.get(&ctx(), "S1").await.unwrap();
    assert_eq!(read.source, Source::Store);
    assert_eq!(read.value, created.value);
    let ops: Vec<_> = read.cache_failures.iter().map(|f| f.op).collect();
    assert_eq!(ops, vec![CacheOp::Get, CacheOp::Set]);

    let updated = repo
        .update(
            &ctx(),
            "S1",
            StudentUpdate {
                last_name: Some("Byron".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.value.last_name, "Byron");
    assert_eq!(updated.cache_failures.len(), 3);
    assert!(updated.cache_failures.iter().all(|f| f.op == CacheOp::Delete));

    repo.verify_password(&ctx(), "S1", "Abcdef12").await.unwrap();
}

#[tokio::test]
async fn test_cancelled_request() {
    let repo = students(None).await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RequestContext::with_cancel(Duration::from_secs(5), token);

    let err = repo.get(&ctx, "S1").await.unwrap_err();
    assert_eq!(err, AccountError::Interrupted(Interrupted::Cancelled));
}

fn new_user(user_id: Option<&str>, email: &str) -> NewUser {
    NewUser {
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
        email: email.into(),
        phone: "+1 555 0100".into(),
        role: UserRole::Teacher,
        user_id: user_id.map(Into::into),
        password: "Cobol1959".into(),
    }
}

#[tokio::test]
async fn test_user_lifecycle() {
    let repo = users(cache_over(Arc::new(LocalCacheBackend::new()))).await;

    let created = repo.create(&ctx(), new_user(None, "g@x.com")).await.unwrap();
    assert_eq!(created.value.user_id, created.value.id.to_hex());

    // The default user id is an internal identifier, so create caches it under that key.
    let read = repo.get(&ctx(), &created.value.user_id).await.unwrap();
    assert_eq!(read.source, Source::Cache);
    assert_eq!(read.value, created.value);

    let named = repo.create(&ctx(), new_user(Some("T-7"), "t7@x.com")).await.unwrap();
    let read = repo.get(&ctx(), "T-7").await.unwrap();
    assert_eq!(read.source, Source::Cache);
    assert_eq!(read.value.id, named.value.id);

    let updated = repo
        .update(
            &ctx(),
            "T-7",
            UserUpdate {
                role: Some(UserRole::User),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.value.role, UserRole::User);
    let read = repo.get(&ctx(), "T-7").await.unwrap();
    assert_eq!(read.source, Source::Store);
    assert_eq!(read.value.role, UserRole::User);

    repo.verify_password(&ctx(), "T-7", "Cobol1959").await.unwrap();
    assert_eq!(
        repo.verify_password(&ctx(), "T-7", "nope").await.unwrap_err(),
        AccountError::InvalidCredentials
    );
    assert_eq!(
        repo.verify_password(&ctx(), "T-8", "Cobol1959").await.unwrap_err(),
        AccountError::InvalidCredentials
    );

    let err = repo.create(&ctx(), new_user(Some("T-9"), "t7@x.com")).await.unwrap_err();
    assert!(err.is_already_exists());

    repo.delete(&ctx(), "T-7").await.unwrap();
    assert!(repo.get(&ctx(), "T-7").await.unwrap_err().is_not_found());
}

/// Memory store whose next `find_one` reads the document, then waits for
/// `release` before returning it.
struct HeldReads {
    inner: InMemoryDocumentStore,
    hold_next: AtomicBool,
    reading: Notify,
    release: Notify,
}

impl HeldReads {
    fn new() -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            hold_next: AtomicBool::new(false),
            reading: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for HeldReads {
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<(), StorageError> {
        self.inner.ensure_unique_index(collection, field).await
    }
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<ObjectId, StorageError> {
        self.inner.insert_one(collection, doc).await
    }
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        let found = self.inner.find_one(collection, filter).await;
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.reading.notify_one();
            self.release.notified().await;
        }
        found
    }
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<Option<Document>, StorageError> {
        self.inner.find_one_and_update(collection, filter, set).await
    }
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        self.inner.find_one_and_delete(collection, filter).await
    }
    async fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping().await
    }
    fn backend_name(&self) -> &'static str {
        "held"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_after_update_skips_older_fetch() {
    let store = Arc::new(HeldReads::new());
    let repo = StudentRepository::new(
        store.clone(),
        cache_over(Arc::new(LocalCacheBackend::new())),
        TTL,
        hasher(),
    );
    repo.ensure_indexes().await.unwrap();
    repo.create(&ctx(), new_student("S1", "a@x.com")).await.unwrap();

    // A read by email misses the cache and is held after reading the old document.
    store.hold_next.store(true, Ordering::SeqCst);
    let early_read = {
        let repo = repo.clone();
        tokio::spawn(async move { repo.get_by_email(&ctx(), "a@x.com").await })
    };
    store.reading.notified().await;

    repo.update(
        &ctx(),
        "S1",
        StudentUpdate {
            department: Some("physics".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let read = repo.get_by_email(&ctx(), "a@x.com").await.unwrap();
    assert_eq!(read.value.department.as_deref(), Some("physics"));

    store.release.notify_one();
    let early = early_read.await.unwrap().unwrap();
    assert_eq!(early.value.department.as_deref(), Some("math"));

    let read = repo.get_by_email(&ctx(), "a@x.com").await.unwrap();
    assert_eq!(read.source, Source::Cache);
    assert_eq!(read.value.department.as_deref(), Some("physics"));
}
