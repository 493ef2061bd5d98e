use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use ts_rs::TS;
use utoipa::IntoParams;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
pub const DEFAULT_SORT_BY: &str = "id";
pub const DEFAULT_ORDER_BY: SortDirection = SortDirection::Desc;

/// SortDirection
///
/// The only two directions that ever reach SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses `asc` / `desc` in any case. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// ListParams
///
/// Untrusted list input as it arrives on the query string
/// (`?name=...&status=...&type=...&sort_by=...&order_by=...&page=...&per_page=...`).
///
/// Nothing here is ever rejected. Every accessor returns a bounded, safe value and
/// silently falls back to a default when the input is out of range or unknown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, TS)]
#[into_params(parameter_in = Query)]
#[serde(default)]
#[ts(export)]
pub struct ListParams {
    /// Free-text search on the `name` column.
    pub name: String,
    /// Exact match on the `status` column.
    pub status: String,
    /// Exact match on the `type` column.
    #[serde(rename = "type")]
    pub kind: String,
    pub sort_by: String,
    /// `asc` or `desc`.
    pub order_by: String,
    #[serde(deserialize_with = "lenient_int")]
    pub page: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub per_page: i64,
}

/// Garbage such as `?page=abc` becomes 0 and is then normalized like any other
/// out-of-range value instead of failing the whole request.
fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => n,
        Raw::Text(text) => text.trim().parse().unwrap_or(0),
    })
}

impl ListParams {
    pub fn page(&self) -> i64 {
        if self.page < 1 { DEFAULT_PAGE } else { self.page }
    }

    pub fn per_page(&self) -> i64 {
        match self.per_page {
            n if n < 1 => DEFAULT_PER_PAGE,
            n if n > MAX_PER_PAGE => MAX_PER_PAGE,
            n => n,
        }
    }

    /// `(page - 1) * per_page`, saturating, never negative.
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page()).max(0)
    }

    pub fn direction(&self) -> SortDirection {
        SortDirection::parse(&self.order_by).unwrap_or(DEFAULT_ORDER_BY)
    }

    /// The requested sort column if it is allow-listed, otherwise the default.
    pub fn sort_column<'a>(&'a self, allowed: &HashSet<String>) -> &'a str {
        if allowed.contains(self.sort_by.as_str()) {
            &self.sort_by
        } else {
            DEFAULT_SORT_BY
        }
    }

    /// Number of pages needed for `total` rows at the current page size.
    pub fn total_pages(&self, total: i64) -> i64 {
        if total <= 0 {
            0
        } else {
            (total + self.per_page() - 1) / self.per_page()
        }
    }
}
