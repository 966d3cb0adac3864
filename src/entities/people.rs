//! Portal accounts and faculty.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::remote;
use crate::store::{Direction, Document, Fields, Query};
use crate::sync::{Entity, RecordId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  #[default]
  Student,
}

impl Role {
  fn parse(raw: &str) -> Self {
    if raw.eq_ignore_ascii_case("admin") {
      Role::Admin
    } else {
      Role::Student
    }
  }

  fn as_str(&self) -> &'static str {
    match self {
      Role::Admin => "admin",
      Role::Student => "student",
    }
  }
}

/// Portal account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: RecordId,
  pub name: String,
  pub email: String,
  pub role: Role,
  /// Study year label, e.g. "Year 3"
  pub year: String,
  pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
  #[serde(default, deserialize_with = "remote::string", alias = "displayName")]
  name: String,
  #[serde(default, deserialize_with = "remote::string")]
  email: String,
  #[serde(default, deserialize_with = "remote::string")]
  role: String,
  #[serde(default, deserialize_with = "remote::string")]
  year: String,
  #[serde(default, deserialize_with = "remote::timestamp")]
  created_at: i64,
}

pub struct Users;

impl Entity for Users {
  type Record = User;
  const CACHE_TYPE: &'static str = "users";

  fn query() -> Query {
    Query::collection("users").order_by("createdAt", Direction::Descending)
  }

  fn from_document(doc: &Document) -> User {
    let api: ApiUser = remote::project(&doc.fields);
    User {
      id: RecordId::from(doc.id.as_str()),
      name: api.name,
      email: api.email,
      role: Role::parse(&api.role),
      year: api.year,
      created_at: api.created_at,
    }
  }

  fn to_fields(user: &User) -> Fields {
    remote::fields_of(json!({
      "name": user.name,
      "email": user.email,
      "role": user.role.as_str(),
      "year": user.year,
      "createdAt": user.created_at,
    }))
  }

  fn id(user: &User) -> &RecordId {
    &user.id
  }

  fn set_id(user: &mut User, id: RecordId) {
    user.id = id;
  }
}

/// Faculty member shown in the professors directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Professor {
  pub id: RecordId,
  pub name: String,
  pub department: String,
  pub title: String,
  pub email: String,
  /// Already-uploaded image URL
  pub photo_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProfessor {
  #[serde(default, deserialize_with = "remote::string")]
  name: String,
  #[serde(default, deserialize_with = "remote::string", alias = "specialty")]
  department: String,
  #[serde(default, deserialize_with = "remote::string")]
  title: String,
  #[serde(default, deserialize_with = "remote::string")]
  email: String,
  #[serde(default, deserialize_with = "remote::string", alias = "imageUrl")]
  photo_url: String,
}

pub struct Professors;

impl Entity for Professors {
  type Record = Professor;
  const CACHE_TYPE: &'static str = "professors";

  fn query() -> Query {
    Query::collection("professors").order_by("name", Direction::Ascending)
  }

  fn from_document(doc: &Document) -> Professor {
    let api: ApiProfessor = remote::project(&doc.fields);
    Professor {
      id: RecordId::from(doc.id.as_str()),
      name: api.name,
      department: api.department,
      title: api.title,
      email: api.email,
      photo_url: api.photo_url,
    }
  }

  fn to_fields(professor: &Professor) -> Fields {
    remote::fields_of(json!({
      "name": professor.name,
      "department": professor.department,
      "title": professor.title,
      "email": professor.email,
      "photoUrl": professor.photo_url,
    }))
  }

  fn id(professor: &Professor) -> &RecordId {
    &professor.id
  }

  fn set_id(professor: &mut Professor, id: RecordId) {
    professor.id = id;
  }
}
