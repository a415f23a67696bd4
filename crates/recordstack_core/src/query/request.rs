//! Fetch request descriptor: record type, filter, ordering, batching, limit.

use crate::model::value::Value;
use crate::query::parse::PredicateParseError;
use crate::query::predicate::Predicate;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One ordering key; earlier descriptors take priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub field: String,
    pub direction: SortDirection,
}

impl SortDescriptor {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Language-agnostic query descriptor.
///
/// `batch_size` is a paging hint and never changes results. `fetch_limit`
/// truncates after ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub record_type: String,
    pub predicate: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub batch_size: Option<usize>,
    pub fetch_limit: Option<usize>,
}

impl FetchRequest {
    /// Request for every record of `record_type`, unordered.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            predicate: None,
            sort: Vec::new(),
            batch_size: None,
            fetch_limit: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Parses and sets a textual predicate.
    pub fn filter_str(self, text: &str) -> Result<Self, PredicateParseError> {
        Ok(self.filter(Predicate::parse(text)?))
    }

    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    pub fn ascending(self, field: impl Into<String>) -> Self {
        self.sort_by(SortDescriptor::ascending(field))
    }

    pub fn descending(self, field: impl Into<String>) -> Self {
        self.sort_by(SortDescriptor::descending(field))
    }

    /// Page size hint; `0` means no paging.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = (size > 0).then_some(size);
        self
    }

    /// Result cap; `0` means unlimited.
    pub fn limit(mut self, limit: usize) -> Self {
        self.fetch_limit = (limit > 0).then_some(limit);
        self
    }
}

/// Compares two field maps under `sort`; missing fields read as `Null`.
pub(crate) fn compare_by(
    sort: &[SortDescriptor],
    left: &BTreeMap<String, Value>,
    right: &BTreeMap<String, Value>,
) -> Ordering {
    for descriptor in sort {
        let a = left.get(&descriptor.field).unwrap_or(&Value::Null);
        let b = right.get(&descriptor.field).unwrap_or(&Value::Null);
        let ordering = match descriptor.direction {
            SortDirection::Ascending => a.sort_cmp(b),
            SortDirection::Descending => b.sort_cmp(a),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::{compare_by, FetchRequest, SortDescriptor};
    use crate::model::value::Value;
    use std::cmp::Ordering;
    use std::collections::BTreeMap;

    #[test]
    fn zero_batch_and_limit_mean_unbounded() {
        let request = FetchRequest::new("User").batch_size(0).limit(0);
        assert_eq!(request.batch_size, None);
        assert_eq!(request.fetch_limit, None);
    }

    #[test]
    fn compare_by_uses_descriptors_in_priority_order() {
        let sort = vec![
            SortDescriptor::ascending("team"),
            SortDescriptor::descending("age"),
        ];
        let a = BTreeMap::from([
            ("team".to_string(), Value::from("red")),
            ("age".to_string(), Value::from(30)),
        ]);
        let b = BTreeMap::from([
            ("team".to_string(), Value::from("red")),
            ("age".to_string(), Value::from(40)),
        ]);
        assert_eq!(compare_by(&sort, &a, &b), Ordering::Greater);
        assert_eq!(compare_by(&[], &a, &b), Ordering::Equal);
    }
}
