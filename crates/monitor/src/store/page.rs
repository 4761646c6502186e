//! Pagination and the `<field>:<asc|desc>` sort grammar shared by list
//! queries and the HTTP layer.

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error, PartialEq)]
pub enum PageError {
    #[error("invalid sort expression: {0}")]
    InvalidSort(String),
    #[error("sort field not allowed: {0}")]
    FieldNotAllowed(String),
    #[error("page numbers start at 1")]
    InvalidPage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    /// Parse `<field>:<asc|desc>` against a per-resource whitelist.
    /// A bare `<field>` sorts ascending.
    pub fn parse(raw: &str, allowed: &[&str]) -> Result<Self, PageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PageError::InvalidSort(raw.to_string()));
        }
        let (field, direction) = match raw.split_once(':') {
            Some((f, d)) => (f, d),
            None => (raw, "asc"),
        };
        let descending = match direction {
            "asc" => false,
            "desc" => true,
            _ => return Err(PageError::InvalidSort(raw.to_string())),
        };
        if !allowed.contains(&field) {
            return Err(PageError::FieldNotAllowed(field.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }

    /// SQL fragment. The field has been validated against the whitelist, so
    /// interpolation is safe.
    pub fn as_sql(&self) -> String {
        format!(
            "{} {}",
            self.field,
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

impl std::fmt::Display for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            self.field,
            if self.descending { "desc" } else { "asc" }
        )
    }
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub sort: SortSpec,
}

impl PageRequest {
    pub fn new(
        page: Option<u32>,
        page_size: Option<u32>,
        sort: Option<&str>,
        allowed: &[&str],
        default_sort: &str,
    ) -> Result<Self, PageError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(PageError::InvalidPage);
        }
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let sort = SortSpec::parse(sort.unwrap_or(default_sort), allowed)?;
        Ok(Self {
            page,
            page_size,
            sort,
        })
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// The list envelope every paginated endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub sort: String,
    pub filters: serde_json::Value,
}

impl<T> Page<T> {
    pub fn new(
        data: Vec<T>,
        request: &PageRequest,
        total: i64,
        filters: serde_json::Value,
    ) -> Self {
        Self {
            data,
            page: request.page,
            page_size: request.page_size,
            total,
            sort: request.sort.to_string(),
            filters,
        }
    }
}
