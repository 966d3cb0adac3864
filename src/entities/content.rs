//! Editorial content: news posts, research papers and anatomy maps.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::remote;
use crate::store::{Direction, Document, Fields, Query};
use crate::sync::{Entity, OfflineWritePolicy, RecordId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
  pub id: RecordId,
  pub title: String,
  pub content: String,
  pub image_url: String,
  pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNews {
  #[serde(default, deserialize_with = "remote::string")]
  title: String,
  #[serde(default, deserialize_with = "remote::string", alias = "body")]
  content: String,
  #[serde(default, deserialize_with = "remote::string", alias = "image")]
  image_url: String,
  #[serde(default, deserialize_with = "remote::timestamp")]
  created_at: i64,
}

pub struct News;

impl Entity for News {
  type Record = NewsItem;
  const CACHE_TYPE: &'static str = "news";

  fn query() -> Query {
    Query::collection("news").order_by("createdAt", Direction::Descending)
  }

  fn from_document(doc: &Document) -> NewsItem {
    let api: ApiNews = remote::project(&doc.fields);
    NewsItem {
      id: RecordId::from(doc.id.as_str()),
      title: api.title,
      content: api.content,
      image_url: api.image_url,
      created_at: api.created_at,
    }
  }

  fn to_fields(item: &NewsItem) -> Fields {
    remote::fields_of(json!({
      "title": item.title,
      "content": item.content,
      "imageUrl": item.image_url,
      "createdAt": item.created_at,
    }))
  }

  fn id(item: &NewsItem) -> &RecordId {
    &item.id
  }

  fn set_id(item: &mut NewsItem, id: RecordId) {
    item.id = id;
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchPaper {
  pub id: RecordId,
  pub title: String,
  pub authors: Vec<String>,
  pub summary: String,
  pub pdf_url: String,
  pub year: String,
  pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResearch {
  #[serde(default, deserialize_with = "remote::string")]
  title: String,
  #[serde(default, deserialize_with = "remote::strings", alias = "author")]
  authors: Vec<String>,
  #[serde(default, deserialize_with = "remote::string", alias = "abstract")]
  summary: String,
  #[serde(default, deserialize_with = "remote::string", alias = "fileUrl")]
  pdf_url: String,
  #[serde(default, deserialize_with = "remote::string")]
  year: String,
  #[serde(default, deserialize_with = "remote::timestamp")]
  created_at: i64,
}

/// Research submissions can be drafted offline and are replayed on reconnect.
pub struct Research;

impl Entity for Research {
  type Record = ResearchPaper;
  const CACHE_TYPE: &'static str = "research";

  fn query() -> Query {
    Query::collection("research").order_by("createdAt", Direction::Descending)
  }

  fn from_document(doc: &Document) -> ResearchPaper {
    let api: ApiResearch = remote::project(&doc.fields);
    ResearchPaper {
      id: RecordId::from(doc.id.as_str()),
      title: api.title,
      authors: api.authors,
      summary: api.summary,
      pdf_url: api.pdf_url,
      year: api.year,
      created_at: api.created_at,
    }
  }

  fn to_fields(paper: &ResearchPaper) -> Fields {
    remote::fields_of(json!({
      "title": paper.title,
      "authors": paper.authors,
      "summary": paper.summary,
      "pdfUrl": paper.pdf_url,
      "year": paper.year,
      "createdAt": paper.created_at,
    }))
  }

  fn id(paper: &ResearchPaper) -> &RecordId {
    &paper.id
  }

  fn set_id(paper: &mut ResearchPaper, id: RecordId) {
    paper.id = id;
  }

  fn offline_policy() -> OfflineWritePolicy {
    OfflineWritePolicy::LocalOnly
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapResource {
  pub id: RecordId,
  pub title: String,
  pub description: String,
  pub image_url: String,
  pub category: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMap {
  #[serde(default, deserialize_with = "remote::string", alias = "name")]
  title: String,
  #[serde(default, deserialize_with = "remote::string")]
  description: String,
  #[serde(default, deserialize_with = "remote::string", alias = "image")]
  image_url: String,
  #[serde(default, deserialize_with = "remote::string")]
  category: String,
}

pub struct Maps;

impl Entity for Maps {
  type Record = MapResource;
  const CACHE_TYPE: &'static str = "maps";

  fn query() -> Query {
    Query::collection("maps").order_by("title", Direction::Ascending)
  }

  fn from_document(doc: &Document) -> MapResource {
    let api: ApiMap = remote::project(&doc.fields);
    MapResource {
      id: RecordId::from(doc.id.as_str()),
      title: api.title,
      description: api.description,
      image_url: api.image_url,
      category: api.category,
    }
  }

  fn to_fields(map: &MapResource) -> Fields {
    remote::fields_of(json!({
      "title": map.title,
      "description": map.description,
      "imageUrl": map.image_url,
      "category": map.category,
    }))
  }

  fn id(map: &MapResource) -> &RecordId {
    &map.id
  }

  fn set_id(map: &mut MapResource, id: RecordId) {
    map.id = id;
  }
}
