//! Question bank and the study years it is organised by.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::remote;
use crate::store::{Direction, Document, Fields, Query};
use crate::sync::{Entity, OfflineWritePolicy, RecordId};

/// Multiple-choice question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mcq {
  pub id: RecordId,
  pub question: String,
  pub options: Vec<String>,
  /// Index into `options`
  pub correct_answer: usize,
  pub explanation: String,
  pub subject: String,
  pub year: String,
  pub image_url: String,
  pub created_at: i64,
}

impl Mcq {
  /// The correct option, if the index is in range.
  pub fn correct_option(&self) -> Option<&str> {
    self.options.get(self.correct_answer).map(String::as_str)
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMcq {
  #[serde(default, deserialize_with = "remote::string")]
  question: String,
  #[serde(default, deserialize_with = "remote::strings", alias = "choices")]
  options: Vec<String>,
  #[serde(default, deserialize_with = "remote::integer", alias = "answer")]
  correct_answer: i64,
  #[serde(default, deserialize_with = "remote::string")]
  explanation: String,
  #[serde(default, deserialize_with = "remote::string")]
  subject: String,
  #[serde(default, deserialize_with = "remote::string")]
  year: String,
  #[serde(default, deserialize_with = "remote::string", alias = "image")]
  image_url: String,
  #[serde(default, deserialize_with = "remote::timestamp")]
  created_at: i64,
}

/// MCQs are authored in bulk; offline edits stay local until reconnect and
/// snapshots are de-duplicated by id.
pub struct Mcqs;

impl Entity for Mcqs {
  type Record = Mcq;
  const CACHE_TYPE: &'static str = "mcqs";

  fn query() -> Query {
    Query::collection("mcqs").order_by("createdAt", Direction::Descending)
  }

  fn from_document(doc: &Document) -> Mcq {
    let api: ApiMcq = remote::project(&doc.fields);
    Mcq {
      id: RecordId::from(doc.id.as_str()),
      question: api.question,
      options: api.options,
      correct_answer: usize::try_from(api.correct_answer).unwrap_or_default(),
      explanation: api.explanation,
      subject: api.subject,
      year: api.year,
      image_url: api.image_url,
      created_at: api.created_at,
    }
  }

  fn to_fields(mcq: &Mcq) -> Fields {
    remote::fields_of(json!({
      "question": mcq.question,
      "options": mcq.options,
      "correctAnswer": mcq.correct_answer,
      "explanation": mcq.explanation,
      "subject": mcq.subject,
      "year": mcq.year,
      "imageUrl": mcq.image_url,
      "createdAt": mcq.created_at,
    }))
  }

  fn id(mcq: &Mcq) -> &RecordId {
    &mcq.id
  }

  fn set_id(mcq: &mut Mcq, id: RecordId) {
    mcq.id = id;
  }

  fn offline_policy() -> OfflineWritePolicy {
    OfflineWritePolicy::LocalOnly
  }

  fn dedup() -> bool {
    true
  }
}

/// Study year used to group MCQs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Year {
  pub id: RecordId,
  pub label: String,
  pub order: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiYear {
  #[serde(default, deserialize_with = "remote::string", alias = "name")]
  label: String,
  #[serde(default, deserialize_with = "remote::integer")]
  order: i64,
}

pub struct Years;

impl Entity for Years {
  type Record = Year;
  const CACHE_TYPE: &'static str = "years";

  fn query() -> Query {
    Query::collection("years").order_by("order", Direction::Ascending)
  }

  fn from_document(doc: &Document) -> Year {
    let api: ApiYear = remote::project(&doc.fields);
    Year {
      id: RecordId::from(doc.id.as_str()),
      label: api.label,
      order: api.order,
    }
  }

  fn to_fields(year: &Year) -> Fields {
    remote::fields_of(json!({
      "label": year.label,
      "order": year.order,
    }))
  }

  fn id(year: &Year) -> &RecordId {
    &year.id
  }

  fn set_id(year: &mut Year, id: RecordId) {
    year.id = id;
  }

  fn probe_before_subscribe() -> bool {
    true
  }

  /// Six-year programme used until the collection is seeded.
  fn fallback() -> Vec<Year> {
    (1..=6)
      .map(|n| Year {
        id: RecordId::from(format!("year-{}", n)),
        label: format!("Year {}", n),
        order: n,
      })
      .collect()
  }
}
