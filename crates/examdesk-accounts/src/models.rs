//! Account entities and their create/update inputs.
//!
//! Entities serialize with their identifier under `_id`, exactly as stored, so the
//! same JSON serves as the document-store record and the cache blob.

use std::sync::LazyLock;

use examdesk_storage::{Document, ObjectId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::AccountError;

/// Role stored on every student record.
pub const STUDENT_ROLE: &str = "student";

const STUDENT_NAME_MAX: usize = 32;
const USER_NAME_MAX: usize = 100;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Invalid email regex")
});

/// Result of an exam a student has taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedExam {
    pub exam_id: ObjectId,
    pub score: f64,
    pub total_marks: f64,
    pub passed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// A student account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub student_id: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub required_exams: Vec<ObjectId>,
    #[serde(default)]
    pub completed_exams: Vec<CompletedExam>,
}

/// Public view of a student (no password hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub student_id: String,
    pub email: String,
    pub is_active: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Student> for StudentProfile {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id,
            first_name: s.first_name.clone(),
            last_name: s.last_name.clone(),
            role: s.role.clone(),
            department: s.department.clone(),
            student_id: s.student_id.clone(),
            email: s.email.clone(),
            is_active: s.is_active,
            last_login: s.last_login,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Input for creating a student.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub department: Option<String>,
    pub student_id: String,
    pub email: String,
    pub password: String,
}

impl NewStudent {
    /// Checks field formats (not the password policy).
    pub fn validate(&self) -> Result<(), AccountError> {
        validate_name("first_name", &self.first_name, STUDENT_NAME_MAX)?;
        validate_name("last_name", &self.last_name, STUDENT_NAME_MAX)?;
        if self.student_id.trim().is_empty() {
            return Err(AccountError::invalid_input("student_id is required"));
        }
        validate_email(&self.email)
    }
}

/// Partial student update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub required_exams: Option<Vec<ObjectId>>,
    pub completed_exams: Option<Vec<CompletedExam>>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.department.is_none()
            && self.email.is_none()
            && self.is_active.is_none()
            && self.required_exams.is_none()
            && self.completed_exams.is_none()
    }

    /// Validates and converts into top-level fields to set, stamping `updated_at`.
    ///
    /// Text fields are trimmed the same way as on create.
    pub(crate) fn into_set(mut self, now: OffsetDateTime) -> Result<Document, AccountError> {
        for field in [
            &mut self.first_name,
            &mut self.last_name,
            &mut self.department,
            &mut self.email,
        ] {
            trim_in_place(field);
        }
        if self.is_empty() {
            return Err(AccountError::invalid_input("update has no fields"));
        }
        if let Some(name) = &self.first_name {
            validate_name("first_name", name, STUDENT_NAME_MAX)?;
        }
        if let Some(name) = &self.last_name {
            validate_name("last_name", name, STUDENT_NAME_MAX)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }

        let mut set = Document::new();
        put(&mut set, "first_name", self.first_name)?;
        put(&mut set, "last_name", self.last_name)?;
        put(&mut set, "department", self.department)?;
        put(&mut set, "email", self.email)?;
        put(&mut set, "is_active", self.is_active)?;
        put(&mut set, "required_exams", self.required_exams)?;
        put(&mut set, "completed_exams", self.completed_exams)?;
        set.insert("updated_at".into(), timestamp(now)?);
        Ok(set)
    }
}

/// Role of a staff user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Teacher,
    User,
}

/// A staff account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    pub user_id: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Public view of a staff user (no password hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: ObjectId,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            user_id: u.user_id.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            email: u.email.clone(),
            phone: u.phone.clone(),
            role: u.role,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    /// Defaults to the hex form of the generated identifier.
    #[serde(default)]
    pub user_id: Option<String>,
    pub password: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), AccountError> {
        validate_name("first_name", &self.first_name, USER_NAME_MAX)?;
        validate_name("last_name", &self.last_name, USER_NAME_MAX)?;
        validate_email(&self.email)?;
        if self.phone.trim().is_empty() {
            return Err(AccountError::invalid_input("phone is required"));
        }
        if matches!(&self.user_id, Some(id) if id.trim().is_empty()) {
            return Err(AccountError::invalid_input("user_id must not be blank"));
        }
        Ok(())
    }
}

/// Partial user update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<UserRole>,
}

impl UserUpdate {
    pub(crate) fn into_set(mut self, now: OffsetDateTime) -> Result<Document, AccountError> {
        for field in [
            &mut self.first_name,
            &mut self.last_name,
            &mut self.email,
            &mut self.phone,
        ] {
            trim_in_place(field);
        }
        if self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.role.is_none()
        {
            return Err(AccountError::invalid_input("update has no fields"));
        }
        if let Some(name) = &self.first_name {
            validate_name("first_name", name, USER_NAME_MAX)?;
        }
        if let Some(name) = &self.last_name {
            validate_name("last_name", name, USER_NAME_MAX)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if matches!(&self.phone, Some(phone) if phone.is_empty()) {
            return Err(AccountError::invalid_input("phone is required"));
        }

        let mut set = Document::new();
        put(&mut set, "first_name", self.first_name)?;
        put(&mut set, "last_name", self.last_name)?;
        put(&mut set, "email", self.email)?;
        put(&mut set, "phone", self.phone)?;
        put(&mut set, "role", self.role)?;
        set.insert("updated_at".into(), timestamp(now)?);
        Ok(set)
    }
}

fn trim_in_place(value: &mut Option<String>) {
    if let Some(text) = value {
        let trimmed = text.trim();
        if trimmed.len() != text.len() {
            *text = trimmed.to_string();
        }
    }
}

fn validate_name(field: &str, value: &str, max: usize) -> Result<(), AccountError> {
    let len = value.trim().chars().count();
    if !(2..=max).contains(&len) {
        return Err(AccountError::invalid_input(format!(
            "{field} must be between 2 and {max} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AccountError> {
    if !EMAIL_RE.is_match(email) {
        return Err(AccountError::invalid_input(format!("invalid email: {email}")));
    }
    Ok(())
}

fn put<T: Serialize>(set: &mut Document, field: &str, value: Option<T>) -> Result<(), AccountError> {
    if let Some(value) = value {
        let value =
            serde_json::to_value(value).map_err(|e| AccountError::serialization(e.to_string()))?;
        set.insert(field.to_string(), value);
    }
    Ok(())
}

fn timestamp(at: OffsetDateTime) -> Result<Value, AccountError> {
    at.format(&time::format_description::well_known::Rfc3339)
        .map(Value::String)
        .map_err(|e| AccountError::serialization(e.to_string()))
}

/// Encodes an entity as a storable document.
pub(crate) fn to_document<T: Serialize>(entity: &T) -> Result<Document, AccountError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AccountError::serialization("entity is not a JSON object")),
        Err(e) => Err(AccountError::serialization(e.to_string())),
    }
}

/// Decodes a stored document into an entity.
pub(crate) fn from_document<T: serde::de::DeserializeOwned>(
    doc: Document,
) -> Result<T, AccountError> {
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| AccountError::serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn student() -> Student {
        Student {
            id: ObjectId::from_bytes([1; 12]),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role: STUDENT_ROLE.into(),
            department: Some("math".into()),
            student_id: "S1".into(),
            email: "a@x.com".into(),
            password_hash: "$argon2id$stub".into(),
            is_active: true,
            last_login: None,
            created_at: datetime!(2024-05-01 10:00:00.123456 UTC),
            updated_at: datetime!(2024-05-01 10:00:00.123456 UTC),
            required_exams: vec![ObjectId::from_bytes([2; 12])],
            completed_exams: vec![CompletedExam {
                exam_id: ObjectId::from_bytes([3; 12]),
                score: 42.5,
                total_marks: 50.0,
                passed: true,
                completed_at: datetime!(2024-06-01 09:30:00 UTC),
            }],
        }
    }

    #[test]
    fn test_student_document_shape() {
        let doc = to_document(&student()).unwrap();
        assert_eq!(doc["_id"], Value::String("010101010101010101010101".into()));
        assert!(
            doc["created_at"]
                .as_str()
                .unwrap()
                .starts_with("2024-05-01T10:00:00.123456")
        );
        assert!(!doc.contains_key("last_login") || doc["last_login"].is_null());
        let back: Student = from_document(doc).unwrap();
        assert_eq!(back, student());
    }

    #[test]
    fn test_profile_hides_hash() {
        let profile = StudentProfile::from(&student());
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["id"], "010101010101010101010101");
        assert!(json.get("last_login").is_none());
    }

    #[test]
    fn test_new_student_validation() {
        let mut input = NewStudent {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            department: None,
            student_id: "S1".into(),
            email: "a@x.com".into(),
            password: "Abcdef12".into(),
        };
        assert!(input.validate().is_ok());

        input.email = "not-an-email".into();
        assert!(matches!(input.validate(), Err(AccountError::InvalidInput { .. })));

        input.email = "a@x.com".into();
        input.first_name = "A".into();
        assert!(input.validate().is_err());

        input.first_name = "Ada".into();
        input.student_id = "  ".into();
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_update_into_set() {
        let now = datetime!(2024-07-01 00:00:00 UTC);
        let set = StudentUpdate {
            department: Some("physics".into()),
            is_active: Some(false),
            ..Default::default()
        }
        .into_set(now)
        .unwrap();
        assert_eq!(set["department"], "physics");
        assert_eq!(set["is_active"], false);
        assert_eq!(set["updated_at"], "2024-07-01T00:00:00Z");
        assert!(!set.contains_key("email"));

        assert!(StudentUpdate::default().into_set(now).is_err());
        assert!(
            StudentUpdate {
                email: Some("bad".into()),
                ..Default::default()
            }
            .into_set(now)
            .is_err()
        );
    }

    #[test]
    fn test_update_trims_like_create() {
        let now = datetime!(2024-07-01 00:00:00 UTC);
        let set = StudentUpdate {
            first_name: Some("  Grace ".into()),
            last_name: Some("Hopper\n".into()),
            department: Some(" cs ".into()),
            email: Some(" g@x.com ".into()),
            ..Default::default()
        }
        .into_set(now)
        .unwrap();
        assert_eq!(set["first_name"], "Grace");
        assert_eq!(set["last_name"], "Hopper");
        assert_eq!(set["department"], "cs");
        assert_eq!(set["email"], "g@x.com");

        let set = UserUpdate {
            first_name: Some(" Alan ".into()),
            phone: Some(" 555-0100 ".into()),
            ..Default::default()
        }
        .into_set(now)
        .unwrap();
        assert_eq!(set["first_name"], "Alan");
        assert_eq!(set["phone"], "555-0100");

        assert!(
            UserUpdate {
                phone: Some("   ".into()),
                ..Default::default()
            }
            .into_set(now)
            .is_err()
        );
    }

    #[test]
    fn test_user_role_wire_format() {
        assert_eq!(serde_json::to_value(UserRole::Teacher).unwrap(), "TEACHER");
        assert_eq!(
            serde_json::from_value::<UserRole>(Value::String("USER".into())).unwrap(),
            UserRole::User
        );
        assert!(serde_json::from_value::<UserRole>(Value::String("ADMIN".into())).is_err());
    }
}
