//! Course and subscription orders placed by students.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::remote;
use crate::store::{Direction, Document, Fields, Query};
use crate::sync::{Entity, RecordId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  #[default]
  Pending,
  Approved,
  Rejected,
}

impl OrderStatus {
  fn parse(raw: &str) -> Self {
    match raw.to_ascii_lowercase().as_str() {
      "approved" | "completed" | "paid" => OrderStatus::Approved,
      "rejected" | "cancelled" => OrderStatus::Rejected,
      _ => OrderStatus::Pending,
    }
  }

  fn as_str(&self) -> &'static str {
    match self {
      OrderStatus::Pending => "pending",
      OrderStatus::Approved => "approved",
      OrderStatus::Rejected => "rejected",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: RecordId,
  pub user_id: String,
  pub user_name: String,
  pub items: Vec<String>,
  pub amount: f64,
  pub status: OrderStatus,
  /// Already-uploaded payment receipt URL
  pub receipt_url: String,
  pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOrder {
  #[serde(default, deserialize_with = "remote::string")]
  user_id: String,
  #[serde(default, deserialize_with = "remote::string")]
  user_name: String,
  #[serde(default, deserialize_with = "remote::strings")]
  items: Vec<String>,
  #[serde(default, deserialize_with = "remote::float", alias = "total")]
  amount: f64,
  #[serde(default, deserialize_with = "remote::string")]
  status: String,
  #[serde(default, deserialize_with = "remote::string", alias = "receiptImage")]
  receipt_url: String,
  #[serde(default, deserialize_with = "remote::timestamp")]
  created_at: i64,
}

pub struct Orders;

impl Entity for Orders {
  type Record = Order;
  const CACHE_TYPE: &'static str = "orders";

  fn query() -> Query {
    Query::collection("orders").order_by("createdAt", Direction::Descending)
  }

  fn from_document(doc: &Document) -> Order {
    let api: ApiOrder = remote::project(&doc.fields);
    Order {
      id: RecordId::from(doc.id.as_str()),
      user_id: api.user_id,
      user_name: api.user_name,
      items: api.items,
      amount: api.amount,
      status: OrderStatus::parse(&api.status),
      receipt_url: api.receipt_url,
      created_at: api.created_at,
    }
  }

  fn to_fields(order: &Order) -> Fields {
    remote::fields_of(json!({
      "userId": order.user_id,
      "userName": order.user_name,
      "items": order.items,
      "amount": order.amount,
      "status": order.status.as_str(),
      "receiptUrl": order.receipt_url,
      "createdAt": order.created_at,
    }))
  }

  fn id(order: &Order) -> &RecordId {
    &order.id
  }

  fn set_id(order: &mut Order, id: RecordId) {
    order.id = id;
  }
}
