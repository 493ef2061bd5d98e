//! Locale-aware "contains" search.
//!
//! Free-text input is folded so that `Çağrı`, `cagri` and `ÇAĞRI` all match each
//! other: Turkish letters and the circumflexed vowels collapse onto their ASCII
//! base letter and everything is lowercased. The database side applies the same
//! folding with `TRANSLATE` + `LOWER`, so the comparison is symmetric.

/// Characters folded by `TRANSLATE` in SQL. Must stay aligned with [`FOLD_TO`].
pub const FOLD_FROM: &str = "çÇğĞıİöÖşŞüÜâÂîÎûÛ";
/// Replacement for each character of [`FOLD_FROM`], position by position.
pub const FOLD_TO: &str = "cCgGiIoOsSuUaAiIuU";

/// SearchFilter
///
/// A validated "column contains needle" condition. The needle is stored already
/// folded and unescaped; [`SearchFilter::like_pattern`] produces the bound
/// parameter for SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    column: String,
    needle: String,
}

impl SearchFilter {
    /// Returns `None` for blank input so callers can skip the predicate entirely.
    pub fn new(column: impl Into<String>, input: &str) -> Option<Self> {
        let needle = fold(input.trim());
        if needle.is_empty() {
            return None;
        }
        Some(Self {
            column: column.into(),
            needle,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// `%needle%` with LIKE metacharacters escaped.
    pub fn like_pattern(&self) -> String {
        format!("%{}%", escape_like(&self.needle))
    }

    /// SQL expression for the folded column, without the LIKE operand.
    /// `qualifier` is the table alias, e.g. `t`.
    pub fn folded_column_sql(&self, qualifier: &str) -> String {
        format!(
            "LOWER(TRANSLATE(CAST({qualifier}.\"{}\" AS TEXT), '{FOLD_FROM}', '{FOLD_TO}'))",
            self.column
        )
    }

    /// In-process evaluation with the same folding as the SQL side.
    pub fn matches(&self, haystack: &str) -> bool {
        fold(haystack).contains(&self.needle)
    }
}

/// Folds a string for comparison: Turkish/circumflex letters to ASCII, then lowercase.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .map(fold_char)
        .flat_map(char::to_lowercase)
        .collect()
}

fn fold_char(c: char) -> char {
    FOLD_FROM
        .chars()
        .zip(FOLD_TO.chars())
        .find_map(|(from, to)| (from == c).then_some(to))
        .unwrap_or(c)
}

/// Escapes `\`, `%` and `_` for a LIKE pattern using the default `\` escape.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
