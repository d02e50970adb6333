//! Pagination types shared by all repositories.

use serde::{Deserialize, Serialize};

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum allowed items per page.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Pagination options for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    /// Page number (1-indexed).
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Creates a pagination, clamping `page` to >= 1 and `per_page` to
    /// `[1, MAX_PAGE_SIZE]`.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Builds a pagination from optional query parameters.
    pub fn from_query(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    /// SQL offset for LIMIT/OFFSET queries.
    pub fn offset(&self) -> u32 {
        (self.page.saturating_sub(1)) * self.per_page
    }

    /// SQL limit for LIMIT/OFFSET queries.
    pub fn limit(&self) -> u32 {
        self.per_page
    }

    /// Total pages for a given item count.
    pub fn total_pages(&self, total_items: u64) -> u32 {
        if total_items == 0 {
            return 1;
        }
        ((total_items as f64) / (self.per_page as f64)).ceil() as u32
    }
}

/// A page of results plus pagination metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: u64,
    /// Current page (1-indexed).
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

impl<T> PaginatedResult<T> {
    /// Builds a result from items, a total count, and the pagination
    /// used for the query.
    pub fn new(items: Vec<T>, total: u64, pagination: &Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
            total_pages: pagination.total_pages(total),
        }
    }

    /// True when there are no items on this page.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Maps the items to a different type.
    pub fn map<U, F>(self, f: F) -> PaginatedResult<U>
    where
        F: FnMut(T) -> U,
    {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_default() {
        let p = Pagination::default();
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn test_pagination_clamps() {
        assert_eq!(Pagination::new(0, 50).page, 1);
        assert_eq!(Pagination::new(1, 5000).per_page, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(1, 0).per_page, 1);
    }

    #[test]
    fn test_pagination_offset() {
        let p = Pagination::new(3, 25);
        assert_eq!(p.offset(), 50);
        assert_eq!(p.limit(), 25);
    }

    #[test]
    fn test_total_pages() {
        let p = Pagination::new(1, 10);
        assert_eq!(p.total_pages(0), 1);
        assert_eq!(p.total_pages(10), 1);
        assert_eq!(p.total_pages(11), 2);
        assert_eq!(p.total_pages(101), 11);
    }

    #[test]
    fn test_paginated_result() {
        let p = Pagination::new(2, 5);
        let result = PaginatedResult::new(vec![6, 7, 8, 9, 10], 13, &p);
        assert_eq!(result.len(), 5);
        assert_eq!(result.total_pages, 3);

        let mapped = result.map(|x| x * 2);
        assert_eq!(mapped.items[0], 12);
        assert_eq!(mapped.total, 13);
    }
}
