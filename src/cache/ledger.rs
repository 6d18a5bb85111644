//! Pagination ledger: which entities a list query has cached, and where to resume.

use std::collections::HashSet;

use super::traits::Cacheable;

/// One page of results as returned by the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub results: Vec<T>,
  pub total_results: u64,
  /// Page number to request next, absent when this was the last page
  pub next_page: Option<u32>,
}

/// Durable record of a list query's cached ids, in remote order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
  pub query_key: String,
  pub ids: Vec<String>,
  pub total_results: u64,
  pub next_page: Option<u32>,
}

impl LedgerEntry {
  /// Ledger for a freshly fetched first page. Replaces any previous entry.
  pub fn first_page<T: Cacheable>(query_key: impl Into<String>, page: &Page<T>) -> Self {
    let mut entry = Self {
      query_key: query_key.into(),
      ids: Vec::with_capacity(page.results.len()),
      total_results: page.total_results,
      next_page: page.next_page,
    };
    entry.append_ids(&page.results);
    entry
  }

  /// A copy of this entry with `page` appended.
  ///
  /// Ids already in the ledger keep their first position.
  pub fn extended<T: Cacheable>(&self, page: &Page<T>) -> Self {
    let mut entry = Self {
      query_key: self.query_key.clone(),
      ids: self.ids.clone(),
      total_results: page.total_results,
      next_page: page.next_page,
    };
    entry.append_ids(&page.results);
    entry
  }

  /// A copy of this entry with no further page to fetch.
  pub fn exhausted(&self) -> Self {
    Self {
      next_page: None,
      ..self.clone()
    }
  }

  fn append_ids<T: Cacheable>(&mut self, results: &[T]) {
    let mut seen: HashSet<String> = self.ids.iter().cloned().collect();
    for entity in results {
      let id = entity.cache_key();
      if seen.insert(id.clone()) {
        self.ids.push(id);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::{page, Item};

  #[test]
  fn test_first_page_keeps_remote_order() {
    let entry = LedgerEntry::first_page("items", &page(&[3, 1, 2], 10, Some(2)));
    assert_eq!(entry.ids, vec!["3", "1", "2"]);
    assert_eq!(entry.total_results, 10);
    assert_eq!(entry.next_page, Some(2));
  }

  #[test]
  fn test_sequential_extensions_concatenate() {
    let mut entry = LedgerEntry::first_page("items", &page(&[1, 2], 6, Some(2)));
    entry = entry.extended(&page(&[3, 4], 6, Some(3)));
    entry = entry.extended(&page(&[5, 6], 6, None));

    assert_eq!(entry.ids, vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(entry.next_page, None);
    assert_eq!(entry.query_key, "items");
  }

  #[test]
  fn test_extension_skips_ids_already_present() {
    let entry = LedgerEntry::first_page("items", &page(&[1, 2], 4, Some(2)));
    let entry = entry.extended(&page(&[2, 3], 4, None));
    assert_eq!(entry.ids, vec!["1", "2", "3"]);
  }

  #[test]
  fn test_total_results_follow_latest_page() {
    let entry = LedgerEntry::first_page("items", &page(&[1], 100, Some(2)));
    let entry = entry.extended(&Page {
      results: vec![Item::new(2)],
      total_results: 120,
      next_page: Some(3),
    });
    assert_eq!(entry.total_results, 120);
    assert_eq!(entry.next_page, Some(3));
  }

  #[test]
  fn test_exhausted_clears_next_page_only() {
    let entry = LedgerEntry::first_page("items", &page(&[1, 2], 2, Some(2))).exhausted();
    assert_eq!(entry.next_page, None);
    assert_eq!(entry.ids, vec!["1", "2"]);
  }
}
