//! Row types that never leave the DB layer, plus column helpers shared by
//! the query modules. API-facing records live in `scdio_types::models`.

use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// Login lookup result; carries the password hash, so it is never serialised.
pub struct UserCredentials {
    pub id: i64,
    pub username: String,
    pub password: String,
}

/// Decode a TEXT column holding JSON.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a TEXT column through a `parse` function (enums stored by name).
pub(crate) fn parsed_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

/// Splits a `GROUP_CONCAT(..., char(31))` column; NULL yields an empty list.
pub(crate) fn concat_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .map(|s| s.split('\u{1f}').map(str::to_string).collect())
        .unwrap_or_default())
}
