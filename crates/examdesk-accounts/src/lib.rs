//! Student and staff accounts for the examdesk backend.
//!
//! Repositories read through the cache when one is configured and always write to
//! the document store first. Cache trouble never fails a request; it shows up in
//! [`Outcome::cache_failures`](examdesk_cache::Outcome) instead.

mod error;
mod models;
mod password;
mod repository;

pub use error::AccountError;
pub use models::{
    CompletedExam, NewStudent, NewUser, STUDENT_ROLE, Student, StudentProfile, StudentUpdate,
    User, UserProfile, UserRole, UserUpdate,
};
pub use password::{CredentialHasher, MIN_PASSWORD_LEN, validate_password};
pub use repository::{
    AccountCache, DEFAULT_STUDENT_TTL, DEFAULT_USER_TTL, StudentRepository, UserRepository,
};
