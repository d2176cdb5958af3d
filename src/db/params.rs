//! Statement parameter binding.
//!
//! One generic binder serves all three backends: every `QueryParam` variant
//! maps onto a Rust type each driver can encode.

use crate::models::QueryParam;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

type Arguments<'q, DB> = <DB as Database>::Arguments<'q>;

/// Bind `params` positionally to `query`.
pub(crate) fn bind_params<'q, DB>(
    query: Query<'q, DB, Arguments<'q, DB>>,
    params: &'q [QueryParam],
) -> Query<'q, DB, Arguments<'q, DB>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    params.iter().fold(query, |query, param| match param {
        // Untyped NULL; every backend coerces it to the column type
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    })
}
