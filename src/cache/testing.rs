//! Fixtures shared by the cache tests.

use serde::{Deserialize, Serialize};

use super::ledger::Page;
use super::traits::{Cacheable, QueryKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id: u32,
  pub name: String,
}

impl Item {
  pub fn new(id: u32) -> Self {
    Self {
      id,
      name: format!("item {}", id),
    }
  }
}

impl Cacheable for Item {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "item"
  }
}

pub struct ItemList(pub &'static str);

impl QueryKey for ItemList {
  fn ledger_key(&self) -> String {
    format!("ItemList.{}", self.0)
  }

  fn description(&self) -> String {
    format!("{} items", self.0)
  }
}

pub fn page(ids: &[u32], total_results: u64, next_page: Option<u32>) -> Page<Item> {
  Page {
    results: ids.iter().copied().map(Item::new).collect(),
    total_results,
    next_page,
  }
}

/// Ids `start..start + count`, as a page.
pub fn page_range(start: u32, count: u32, total_results: u64, next_page: Option<u32>) -> Page<Item> {
  let ids: Vec<u32> = (start..start + count).collect();
  page(&ids, total_results, next_page)
}
