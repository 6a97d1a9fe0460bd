//! Request/response payload shapes for the credit, OAuth and operation features.
//!
//! Plain serde values: requests carry a `validate()` that the use cases call first,
//! responses are built from domain entities with `From`.

pub mod credit;
pub mod oauth;
pub mod operation;

use crate::domain::DomainError;
use serde::{Deserialize, Serialize};

/// Hard cap on page size, matching the list endpoints of the web API.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Offset pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
        }
    }
}

impl PageRequest {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.skip < 0 {
            return Err(DomainError::Validation("skip must be >= 0".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.limit) {
            return Err(DomainError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: PageRequest) -> Self {
        Self {
            items,
            total,
            skip: page.skip,
            limit: page.limit,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            skip: self.skip,
            limit: self.limit,
        }
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub(crate) fn require_max_len(field: &str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.chars().count() > max {
        return Err(DomainError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

pub(crate) fn require_positive(field: &str, value: i64) -> Result<(), DomainError> {
    if value <= 0 {
        return Err(DomainError::Validation(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

pub(crate) fn require_non_negative(field: &str, value: i64) -> Result<(), DomainError> {
    if value < 0 {
        return Err(DomainError::Validation(format!("{} must be >= 0", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_bounds() {
        assert!(PageRequest::default().validate().is_ok());
        assert!(PageRequest::new(-1, 20).validate().is_err());
        assert!(PageRequest::new(0, 0).validate().is_err());
        assert!(PageRequest::new(0, 101).validate().is_err());
        assert!(PageRequest::new(40, 100).validate().is_ok());
    }

    #[test]
    fn test_page_request_defaults_from_json() {
        let p: PageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(p, PageRequest::new(0, 20));
    }

    #[test]
    fn test_page_map_keeps_window() {
        let page = Page::new(vec![1, 2, 3], 10, PageRequest::new(3, 3));
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20, 30]);
        assert_eq!((mapped.total, mapped.skip, mapped.limit), (10, 3, 3));
    }

    #[test]
    fn test_max_len_counts_chars() {
        assert!(require_max_len("name", "积分套餐", 4).is_ok());
        assert!(require_max_len("name", "积分套餐A", 4).is_err());
    }
}
