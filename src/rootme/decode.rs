//! Decoders for Root-Me API payloads.
//!
//! The remote API encodes numbers as strings, wraps lists in objects keyed by
//! position (`{"0": {...}, "1": {...}}`), sometimes returns a challenge as a
//! single-element list, and omits fields for empty values. These functions
//! absorb exactly those quirks and reject anything else with a [`DecodeError`].

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{AuthorStub, CatalogPage, Challenge, ChallengeStub, RemoteAuthor, RemoteSolve};

/// Entries per page of the paginated endpoints.
pub const PAGE_SIZE: usize = 50;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot decode {entity} {id}: {reason}")]
pub struct DecodeError {
    pub entity: &'static str,
    pub id: String,
    pub reason: String,
}

/// Field access that remembers which record is being decoded.
struct Record<'a> {
    entity: &'static str,
    id: String,
    fields: &'a Map<String, Value>,
}

impl<'a> Record<'a> {
    fn new(entity: &'static str, id: impl ToString, value: &'a Value) -> Result<Self, DecodeError> {
        let id = id.to_string();
        match value.as_object() {
            Some(fields) => Ok(Self { entity, id, fields }),
            None => Err(DecodeError {
                entity,
                id,
                reason: format!("expected an object, got {}", kind(value)),
            }),
        }
    }

    fn error(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError {
            entity: self.entity,
            id: self.id.clone(),
            reason: reason.into(),
        }
    }

    fn field(&self, name: &str) -> Result<&'a Value, DecodeError> {
        self.fields
            .get(name)
            .ok_or_else(|| self.error(format!("missing field `{}`", name)))
    }

    fn string(&self, name: &str) -> Result<String, DecodeError> {
        match self.field(name)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.error(format!("field `{}` is {}, not a string", name, kind(other)))),
        }
    }

    fn int(&self, name: &str) -> Result<i64, DecodeError> {
        let value = self.field(name)?;
        as_int(value).ok_or_else(|| {
            self.error(format!("field `{}` is not an integer: {}", name, value))
        })
    }

    fn date(&self, name: &str) -> Result<NaiveDateTime, DecodeError> {
        let raw = self.string(name)?;
        NaiveDateTime::parse_from_str(&raw, DATE_FORMAT)
            .map_err(|e| self.error(format!("field `{}` is not a date ({}): {}", name, raw, e)))
    }
}

/// Decode a full author profile. `Ok(None)` means the platform answered with
/// an empty profile (unknown author).
pub fn decode_author(value: &Value, requested_id: i64) -> Result<Option<RemoteAuthor>, DecodeError> {
    let value = unwrap_singleton(value);
    if is_empty(value) {
        return Ok(None);
    }

    let record = Record::new("author", requested_id, value)?;
    let id = record.int("id_auteur")?;
    let username = record.string("nom")?;
    let score = record.int("score")?;
    let position = record.field("position")?;
    let rank = match as_int(position) {
        Some(rank) => rank,
        // Zero-score accounts are not ranked and report an empty position.
        None if score == 0 => 0,
        None => return Err(record.error(format!("`position` is not an integer: {}", position))),
    };

    let validations = match record.field("validations")? {
        Value::Array(items) => items,
        other => return Err(record.error(format!("`validations` is {}", kind(other)))),
    };

    let solves = validations
        .iter()
        .map(|item| -> Result<RemoteSolve, DecodeError> {
            let solve = Record::new("author", id, item)?;
            Ok(RemoteSolve {
                challenge_id: solve.int("id_challenge")?,
                solved_at: solve.date("date")?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(Some(RemoteAuthor {
        id,
        username,
        score,
        rank,
        solves,
    }))
}

/// Decode the detail of challenge `id`.
pub fn decode_challenge(value: &Value, id: i64) -> Result<Challenge, DecodeError> {
    let record = Record::new("challenge", id, unwrap_singleton(value))?;

    // Unsolved challenges have no `validations` field at all.
    let solver_count = match record.fields.get("validations") {
        Some(count) => as_int(count)
            .ok_or_else(|| record.error(format!("`validations` is not an integer: {}", count)))?,
        None => 0,
    };

    Ok(Challenge {
        id,
        title: record.string("titre")?,
        category: record.string("rubrique")?,
        description: record.string("soustitre")?,
        score: record.int("score")?,
        difficulty: record.string("difficulte")?,
        published_at: record.date("date_publication")?,
        solver_count,
    })
}

/// Decode one page of the challenge catalog.
///
/// The first element holds the entries, the last one a `rel` link telling
/// whether another page follows.
pub fn decode_catalog_page(value: &Value, start: usize) -> Result<CatalogPage, DecodeError> {
    let items = value.as_array().ok_or_else(|| DecodeError {
        entity: "catalog page",
        id: start.to_string(),
        reason: format!("expected a list, got {}", kind(value)),
    })?;

    let challenges = match items.first() {
        Some(entries) => indexed_entries("catalog page", start, entries)?
            .into_iter()
            .map(|entry| -> Result<ChallengeStub, DecodeError> {
                let record = Record::new("catalog entry", start, entry)?;
                Ok(ChallengeStub {
                    id: record.int("id_challenge")?,
                    title: record.string("titre")?,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?,
        None => Vec::new(),
    };

    let has_next = items.len() > 1
        && items
            .last()
            .and_then(|link| link.get("rel"))
            .and_then(Value::as_str)
            == Some("next");

    Ok(CatalogPage {
        challenges,
        has_next,
    })
}

/// Decode one page of an author search, at most [`PAGE_SIZE`] hits.
///
/// No hit is encoded as `[{}]`.
pub fn decode_author_search(value: &Value, name: &str) -> Result<Vec<AuthorStub>, DecodeError> {
    let first = match value {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        },
        other => {
            return Err(DecodeError {
                entity: "author search",
                id: name.to_string(),
                reason: format!("expected a list, got {}", kind(other)),
            })
        }
    };

    indexed_entries("author search", name, first)?
        .into_iter()
        .take(PAGE_SIZE)
        .map(|entry| -> Result<AuthorStub, DecodeError> {
            let record = Record::new("author search", name, entry)?;
            Ok(AuthorStub {
                id: record.int("id_auteur")?,
                username: record.string("nom")?,
            })
        })
        .collect()
}

/// Values of a position-keyed object, in position order.
fn indexed_entries<'a>(
    entity: &'static str,
    id: impl ToString,
    value: &'a Value,
) -> Result<Vec<&'a Value>, DecodeError> {
    let record = Record::new(entity, id, value)?;
    let mut entries = record
        .fields
        .iter()
        .map(|(key, entry)| {
            key.parse::<usize>()
                .map(|position| (position, entry))
                .map_err(|_| record.error(format!("unexpected key `{}`", key)))
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;
    entries.sort_by_key(|(position, _)| *position);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

fn unwrap_singleton(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
