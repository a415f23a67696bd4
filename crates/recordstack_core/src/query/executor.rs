//! Fetch and count execution inside a session task.
//!
//! # Responsibility
//! - Validate a `FetchRequest` against its record type.
//! - Merge the session's pending view (own and inherited changes) with store
//!   rows read page by page.
//!
//! # Invariants
//! - Store rows shadowed by a pending change are excluded in SQL, so each
//!   record id appears at most once.
//! - On equal sort keys a store row precedes a pending row.
//! - `batch_size` changes how many rows are read per round trip, never the
//!   result.

use crate::db::{StoreQuery, StoreRow};
use crate::error::{StackError, StackResult};
use crate::model::record::{Record, RecordId};
use crate::model::schema::RecordType;
use crate::query::request::{compare_by, FetchRequest};
use crate::query::sql::{compile_order, compile_predicate, SqlFragment};
use crate::session::{OverlayEntry, SessionScope};
use log::debug;
use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::sync::Arc;

struct Plan {
    entity: Arc<RecordType>,
    filter: Option<SqlFragment>,
    order: SqlFragment,
    /// Matching pending rows, already sorted.
    pending: Vec<StoreRow>,
    /// Pending ids of this record type, hidden from store reads.
    shadowed: Vec<RecordId>,
}

impl Plan {
    fn build(scope: &mut SessionScope<'_>, request: &FetchRequest) -> StackResult<Self> {
        let entity = scope.describe(&request.record_type)?;
        validate(&entity, request)?;

        let overlay = scope.pending_overlay()?;
        let (pending, shadowed) = split_overlay(&entity, request, overlay);

        Ok(Self {
            filter: request.predicate.as_ref().map(compile_predicate),
            order: compile_order(&request.sort),
            entity,
            pending,
            shadowed,
        })
    }

    fn store_query(&self) -> StoreQuery<'_> {
        StoreQuery {
            record_type: &self.entity.name,
            filter: self.filter.as_ref(),
            order: Some(&self.order),
            excluded: &self.shadowed,
        }
    }
}

/// Ordered records matching `request`, truncated to its fetch limit.
pub(crate) fn fetch(
    scope: &mut SessionScope<'_>,
    request: &FetchRequest,
) -> StackResult<Vec<Record>> {
    let plan = Plan::build(scope, request)?;
    let limit = request.fetch_limit;
    if limit == Some(0) {
        return Ok(Vec::new());
    }
    let full = |rows: &Vec<StoreRow>| limit.is_some_and(|limit| rows.len() >= limit);

    let store = Arc::clone(scope.session().store());
    let mut rows: Vec<StoreRow> = Vec::new();
    let mut pending = plan.pending.iter().cloned().peekable();
    let batch_size = request.batch_size.filter(|size| *size > 0);

    store.scan(plan.store_query(), batch_size, |row| {
        while let Some(next) = pending.next_if(|candidate| {
            compare_by(&request.sort, &candidate.fields, &row.fields) == Ordering::Less
        }) {
            rows.push(next);
            if full(&rows) {
                return ControlFlow::Break(());
            }
        }
        rows.push(row);
        if full(&rows) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    for next in pending {
        if full(&rows) {
            break;
        }
        rows.push(next);
    }

    debug!(
        "event=fetch module=query status=ok session={} record_type={} rows={} pending={}",
        scope.session().id(),
        plan.entity.name,
        rows.len(),
        plan.pending.len()
    );

    Ok(rows
        .into_iter()
        .map(|row| scope.register(row.record_id, &plan.entity, row.fields))
        .collect())
}

/// Number of records matching `request`; sort, batch size and limit are
/// ignored.
pub(crate) fn count(scope: &mut SessionScope<'_>, request: &FetchRequest) -> StackResult<usize> {
    let plan = Plan::build(scope, request)?;
    let stored = scope.session().store().count(StoreQuery {
        order: None,
        ..plan.store_query()
    })?;
    Ok(stored + plan.pending.len())
}

fn validate(entity: &RecordType, request: &FetchRequest) -> StackResult<()> {
    if let Some(predicate) = &request.predicate {
        predicate.validate(entity).map_err(StackError::InvalidFilter)?;
    }
    for descriptor in &request.sort {
        if entity.field(&descriptor.field).is_none() {
            return Err(StackError::InvalidFilter(format!(
                "unknown sort field `{}` on `{}`",
                descriptor.field, entity.name
            )));
        }
    }
    Ok(())
}

fn split_overlay(
    entity: &RecordType,
    request: &FetchRequest,
    overlay: Vec<OverlayEntry>,
) -> (Vec<StoreRow>, Vec<RecordId>) {
    let mut pending = Vec::new();
    let mut shadowed = Vec::new();

    for entry in overlay {
        if entry.entity.name != entity.name {
            continue;
        }
        shadowed.push(entry.record_id);
        let Some(fields) = entry.fields else {
            continue;
        };
        let matches = request
            .predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(&fields));
        if matches {
            pending.push(StoreRow {
                record_id: entry.record_id,
                fields,
            });
        }
    }

    pending.sort_by(|left, right| compare_by(&request.sort, &left.fields, &right.fields));
    (pending, shadowed)
}

#[cfg(test)]
mod tests {
    use super::{split_overlay, validate};
    use crate::model::schema::{FieldDef, FieldKind, RecordType};
    use crate::model::value::Value;
    use crate::query::predicate::Predicate;
    use crate::query::request::FetchRequest;
    use crate::session::OverlayEntry;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn user() -> Arc<RecordType> {
        Arc::new(
            RecordType::new("User")
                .with_field(FieldDef::required("name", FieldKind::Text))
                .with_field(FieldDef::required("age", FieldKind::Integer)),
        )
    }

    fn entry(entity: &Arc<RecordType>, age: Option<i64>) -> OverlayEntry {
        OverlayEntry {
            record_id: Uuid::new_v4(),
            entity: Arc::clone(entity),
            fields: age.map(|age| BTreeMap::from([("age".to_string(), Value::from(age))])),
        }
    }

    #[test]
    fn validate_rejects_unknown_filter_and_sort_fields() {
        let user = user();
        let bad_filter = FetchRequest::new("User").filter(Predicate::eq("email", "x"));
        let bad_sort = FetchRequest::new("User").ascending("email");
        assert_eq!(validate(&user, &bad_filter).unwrap_err().code(), "invalid_filter");
        assert_eq!(validate(&user, &bad_sort).unwrap_err().code(), "invalid_filter");
        validate(&user, &FetchRequest::new("User").descending("age")).unwrap();
    }

    #[test]
    fn split_overlay_shadows_deletes_and_sorts_matches() {
        let user = user();
        let other = Arc::new(RecordType::new("Team"));
        let overlay = vec![
            entry(&user, Some(30)),
            entry(&user, None),
            entry(&user, Some(10)),
            entry(&user, Some(50)),
            entry(&other, None),
        ];
        let request = FetchRequest::new("User")
            .filter(Predicate::lt("age", 40))
            .ascending("age");

        let (pending, shadowed) = split_overlay(&user, &request, overlay);
        let ages: Vec<_> = pending.iter().map(|row| row.fields["age"].clone()).collect();
        assert_eq!(ages, vec![Value::from(10), Value::from(30)]);
        assert_eq!(shadowed.len(), 4);
    }
}
