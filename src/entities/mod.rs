//! Records and projections for the portal's collections.

mod commerce;
mod content;
mod mcqs;
mod people;
pub mod remote;

pub use commerce::{Order, OrderStatus, Orders};
pub use content::{MapResource, Maps, News, NewsItem, Research, ResearchPaper};
pub use mcqs::{Mcq, Mcqs, Year, Years};
pub use people::{Professor, Professors, Role, User, Users};

/// Logical cache types of every known collection.
pub const CACHE_TYPES: &[&str] = &[
  "users",
  "orders",
  "news",
  "mcqs",
  "research",
  "professors",
  "maps",
  "years",
];
