//! Evaluates [`QueryExpression`]s against a [`RecordCache`] (§4.4).
//!
//! Synchronous evaluation is the only evaluator built here — the async
//! surface (durable backing stores, §4.7) walks the same expression tree
//! against an [`crate::storage::AsyncKvStore`] instead.

use regex::Regex;
use serde_json::Value;

use crate::cache::RecordCache;
use crate::error::{OrbitError, Result};
use crate::types::{FilterOp, FilterSpecifier, PageSpecifier, QueryExpression, QueryResultData, Record, SortSpecifier};

pub fn evaluate_sync(
    cache: &RecordCache,
    expression: &QueryExpression,
    raise_not_found_exceptions: bool,
) -> Result<QueryResultData> {
    match expression {
        QueryExpression::FindRecord { record } => {
            let found = cache.get_record_sync(record);
            if found.is_none() && raise_not_found_exceptions {
                return Err(OrbitError::RecordNotFound(record.clone()));
            }
            Ok(QueryResultData::One(found))
        }

        QueryExpression::FindRecords {
            type_,
            records,
            filter,
            sort,
            page,
        } => {
            let mut set = if let Some(ids) = records {
                // Unknown identities are silently dropped (§4.4).
                ids.iter().filter_map(|id| cache.get_record_sync(id)).collect()
            } else if let Some(t) = type_ {
                cache.records_of_type(t)
            } else {
                return Err(OrbitError::Assertion(
                    "findRecords requires either a type or an explicit id list".into(),
                ));
            };

            apply_filter(&mut set, filter)?;
            apply_sort(&mut set, sort);
            set = apply_page(set, page.as_ref());

            Ok(QueryResultData::Many(set))
        }

        QueryExpression::FindRelatedRecord {
            record,
            relationship,
        } => {
            let owner = cache
                .get_record_sync(record)
                .ok_or_else(|| OrbitError::RecordNotFound(record.clone()))?;
            let related_id = owner
                .relationships
                .get(relationship)
                .and_then(|d| d.as_to_one())
                .cloned()
                .flatten();
            let found = related_id.and_then(|id| cache.get_record_sync(&id));
            if found.is_none() && raise_not_found_exceptions {
                if let Some(id) = owner.relationships.get(relationship).and_then(|d| d.as_to_one()).cloned().flatten() {
                    return Err(OrbitError::RecordNotFound(id));
                }
            }
            Ok(QueryResultData::One(found))
        }

        QueryExpression::FindRelatedRecords {
            record,
            relationship,
            filter,
            sort,
            page,
        } => {
            let owner = cache
                .get_record_sync(record)
                .ok_or_else(|| OrbitError::RecordNotFound(record.clone()))?;
            let ids = owner
                .relationships
                .get(relationship)
                .and_then(|d| d.as_to_many())
                .map(|v| v.to_vec())
                .unwrap_or_default();
            let mut set: Vec<Record> = ids.iter().filter_map(|id| cache.get_record_sync(id)).collect();

            apply_filter(&mut set, filter)?;
            apply_sort(&mut set, sort);
            set = apply_page(set, page.as_ref());

            Ok(QueryResultData::Many(set))
        }
    }
}

fn apply_filter(set: &mut Vec<Record>, filters: &[FilterSpecifier]) -> Result<()> {
    for f in filters {
        let re = if f.op == FilterOp::Match {
            Some(
                Regex::new(f.value.as_str().unwrap_or_default())
                    .map_err(|e| OrbitError::Assertion(format!("invalid filter regex: {e}")))?,
            )
        } else {
            None
        };
        set.retain(|r| {
            let actual = r.attributes.get(&f.attribute).unwrap_or(&Value::Null);
            match f.op {
                FilterOp::Equal => actual == &f.value,
                FilterOp::GreaterThan => compare(actual, &f.value) == Some(std::cmp::Ordering::Greater),
                FilterOp::LessThan => compare(actual, &f.value) == Some(std::cmp::Ordering::Less),
                FilterOp::GreaterThanOrEqual => {
                    matches!(compare(actual, &f.value), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
                }
                FilterOp::LessThanOrEqual => {
                    matches!(compare(actual, &f.value), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
                }
                FilterOp::Match => re
                    .as_ref()
                    .map(|re| actual.as_str().map(|s| re.is_match(s)).unwrap_or(false))
                    .unwrap_or(false),
            }
        });
    }
    Ok(())
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn apply_sort(set: &mut [Record], specs: &[SortSpecifier]) {
    // Stable sort over specifiers in reverse priority order so the first
    // specifier ends up the primary key.
    for spec in specs.iter().rev() {
        set.sort_by(|a, b| {
            let av = a.attributes.get(&spec.attribute).unwrap_or(&Value::Null);
            let bv = b.attributes.get(&spec.attribute).unwrap_or(&Value::Null);
            let ord = compare(av, bv).unwrap_or(std::cmp::Ordering::Equal);
            if spec.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

fn apply_page(set: Vec<Record>, page: Option<&PageSpecifier>) -> Vec<Record> {
    match page {
        None => set,
        Some(p) => {
            let end = p.limit.map(|l| p.offset + l).unwrap_or(set.len());
            set.into_iter()
                .enumerate()
                .filter(|(i, _)| *i >= p.offset && *i < end)
                .map(|(_, r)| r)
                .collect()
        }
    }
}
