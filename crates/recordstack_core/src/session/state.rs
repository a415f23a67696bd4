//! Worker-confined session state: identity map, pending changes and the
//! per-session record type cache.
//!
//! # Invariants
//! - Only the owning worker thread touches a `SessionState`.
//! - Every id in `changes` with kind `Inserted`/`Updated` has an entry in
//!   `objects`; `Deleted` ids never do.
//! - `seq` values grow monotonically and define pending-change order.
//! - An object without a pending change stays in `objects` only while a
//!   `Record` handle holds its anchor; `prune` drops the rest.

use crate::db::{ChangeSet, RecordWrite};
use crate::error::{StackError, StackResult, ValidationError, ValidationReason};
use crate::model::record::RecordId;
use crate::model::schema::{RecordType, Schema};
use crate::model::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct ManagedObject {
    pub entity: Arc<RecordType>,
    pub fields: BTreeMap<String, Value>,
    handle: Weak<()>,
}

impl ManagedObject {
    fn anchor(&mut self) -> Arc<()> {
        match self.handle.upgrade() {
            Some(anchor) => anchor,
            None => {
                let anchor = Arc::new(());
                self.handle = Arc::downgrade(&anchor);
                anchor
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub kind: ChangeKind,
    pub entity: Arc<RecordType>,
    pub seq: u64,
}

/// One pending change as seen by readers of a session and its children.
///
/// `fields` is `None` for deletions.
#[derive(Debug, Clone)]
pub(crate) struct OverlayEntry {
    pub record_id: RecordId,
    pub entity: Arc<RecordType>,
    pub fields: Option<BTreeMap<String, Value>>,
}

/// Pending change handed from a child session to its parent on save.
#[derive(Debug, Clone)]
pub(crate) struct PromotedChange {
    pub record_id: RecordId,
    pub kind: ChangeKind,
    pub entity: Arc<RecordType>,
    pub fields: Option<BTreeMap<String, Value>>,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    schema: Arc<Schema>,
    objects: HashMap<RecordId, ManagedObject>,
    changes: HashMap<RecordId, PendingChange>,
    next_seq: u64,
    type_cache: HashMap<String, Arc<RecordType>>,
}

impl SessionState {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            objects: HashMap::new(),
            changes: HashMap::new(),
            next_seq: 0,
            type_cache: HashMap::new(),
        }
    }

    pub fn describe(&mut self, name: &str) -> StackResult<Arc<RecordType>> {
        if let Some(entity) = self.type_cache.get(name) {
            return Ok(Arc::clone(entity));
        }
        let entity = self
            .schema
            .record_type(name)
            .ok_or_else(|| StackError::UnknownType(name.to_string()))?;
        self.type_cache
            .insert(name.to_string(), Arc::clone(&entity));
        Ok(entity)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn object(&self, id: &RecordId) -> StackResult<&ManagedObject> {
        self.objects
            .get(id)
            .ok_or(StackError::Invalidated("record"))
    }

    /// Creates a pending insert and returns its id with the anchor its
    /// handles must hold.
    pub fn insert(&mut self, entity: Arc<RecordType>) -> (RecordId, Arc<()>) {
        let id = RecordId::new_v4();
        let anchor = Arc::new(());
        self.objects.insert(
            id,
            ManagedObject {
                entity: Arc::clone(&entity),
                fields: entity.initial_values(),
                handle: Arc::downgrade(&anchor),
            },
        );
        self.record_change(id, ChangeKind::Inserted, entity);
        (id, anchor)
    }

    /// Registers a fetched row unless local pending changes shadow it.
    ///
    /// Returns the object's anchor, shared with any live handle to the same
    /// record.
    pub fn register(
        &mut self,
        id: RecordId,
        entity: &Arc<RecordType>,
        fields: BTreeMap<String, Value>,
    ) -> Arc<()> {
        let pending = self.changes.contains_key(&id);
        match self.objects.get_mut(&id) {
            Some(object) => {
                if !pending {
                    object.entity = Arc::clone(entity);
                    object.fields = fields;
                }
                object.anchor()
            }
            None => {
                let anchor = Arc::new(());
                self.objects.insert(
                    id,
                    ManagedObject {
                        entity: Arc::clone(entity),
                        fields,
                        handle: Arc::downgrade(&anchor),
                    },
                );
                anchor
            }
        }
    }

    /// Drops unchanged objects that no handle refers to anymore.
    pub fn prune(&mut self) -> usize {
        let before = self.objects.len();
        let changes = &self.changes;
        self.objects.retain(|id, object| {
            changes.contains_key(id) || object.handle.strong_count() > 0
        });
        before - self.objects.len()
    }

    pub fn set(&mut self, id: RecordId, field: &str, value: Value) -> StackResult<()> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(StackError::Invalidated("record"))?;
        let entity = Arc::clone(&object.entity);
        let def = entity.field(field).ok_or_else(|| {
            StackError::Validation(ValidationError {
                record_type: entity.name.clone(),
                record_id: Some(id),
                field: field.to_string(),
                reason: ValidationReason::UnknownField,
            })
        })?;
        let actual = value.type_name();
        let coerced = def.kind.coerce(value).ok_or_else(|| {
            StackError::Validation(ValidationError {
                record_type: entity.name.clone(),
                record_id: Some(id),
                field: field.to_string(),
                reason: ValidationReason::KindMismatch {
                    expected: def.kind.as_str(),
                    actual,
                },
            })
        })?;
        object.fields.insert(field.to_string(), coerced);

        if !self.changes.contains_key(&id) {
            self.record_change(id, ChangeKind::Updated, entity);
        }
        Ok(())
    }

    /// Marks `id` deleted. Deleting a pending insert forgets it entirely.
    pub fn delete(&mut self, id: RecordId) -> StackResult<()> {
        let object = self
            .objects
            .remove(&id)
            .ok_or(StackError::Invalidated("record"))?;
        match self.changes.get(&id).map(|change| change.kind) {
            Some(ChangeKind::Inserted) => {
                self.changes.remove(&id);
            }
            _ => self.record_change(id, ChangeKind::Deleted, object.entity),
        }
        Ok(())
    }

    /// Own pending changes in pending order.
    pub fn overlay(&self) -> Vec<OverlayEntry> {
        self.ordered_changes()
            .into_iter()
            .map(|(id, change)| OverlayEntry {
                record_id: *id,
                entity: Arc::clone(&change.entity),
                fields: match change.kind {
                    ChangeKind::Deleted => None,
                    _ => self.objects.get(id).map(|object| object.fields.clone()),
                },
            })
            .collect()
    }

    /// Checks non-optional fields of every inserted or updated record.
    pub fn validate_pending(&self) -> StackResult<()> {
        for (id, change) in self.ordered_changes() {
            if change.kind == ChangeKind::Deleted {
                continue;
            }
            let Some(object) = self.objects.get(id) else {
                continue;
            };
            for def in object.entity.fields.iter().filter(|def| !def.optional) {
                let missing = object
                    .fields
                    .get(&def.name)
                    .map_or(true, Value::is_null);
                if missing {
                    return Err(StackError::Validation(ValidationError {
                        record_type: object.entity.name.clone(),
                        record_id: Some(*id),
                        field: def.name.clone(),
                        reason: ValidationReason::MissingRequired,
                    }));
                }
            }
        }
        Ok(())
    }

    /// Store writes for every pending change, in pending order.
    pub fn change_set(&self) -> ChangeSet {
        let writes = self
            .ordered_changes()
            .into_iter()
            .filter_map(|(id, change)| {
                let record_id = *id;
                let record_type = change.entity.name.clone();
                match change.kind {
                    ChangeKind::Deleted => Some(RecordWrite::Delete { record_id }),
                    ChangeKind::Inserted => {
                        self.objects.get(id).map(|object| RecordWrite::Insert {
                            record_id,
                            record_type,
                            fields: object.fields.clone(),
                        })
                    }
                    ChangeKind::Updated => {
                        self.objects.get(id).map(|object| RecordWrite::Update {
                            record_id,
                            record_type,
                            fields: object.fields.clone(),
                        })
                    }
                }
            })
            .collect();
        ChangeSet { writes }
    }

    /// Pending changes packaged for the parent session, in pending order.
    pub fn promotions(&self) -> Vec<PromotedChange> {
        self.ordered_changes()
            .into_iter()
            .map(|(id, change)| PromotedChange {
                record_id: *id,
                kind: change.kind,
                entity: Arc::clone(&change.entity),
                fields: match change.kind {
                    ChangeKind::Deleted => None,
                    _ => self.objects.get(id).map(|object| object.fields.clone()),
                },
            })
            .collect()
    }

    /// Folds a child's saved changes into this session's pending set.
    pub fn absorb(&mut self, promoted: Vec<PromotedChange>) {
        for change in promoted {
            let id = change.record_id;
            let existing = self.changes.get(&id).map(|pending| pending.kind);
            match (change.kind, change.fields) {
                (ChangeKind::Deleted, _) => {
                    self.objects.remove(&id);
                    self.changes.remove(&id);
                    if existing != Some(ChangeKind::Inserted) {
                        self.record_change(id, ChangeKind::Deleted, change.entity);
                    }
                }
                (kind, Some(fields)) => {
                    let handle = self
                        .objects
                        .remove(&id)
                        .map(|object| object.handle)
                        .unwrap_or_default();
                    self.objects.insert(
                        id,
                        ManagedObject {
                            entity: Arc::clone(&change.entity),
                            fields,
                            handle,
                        },
                    );
                    if !matches!(
                        existing,
                        Some(ChangeKind::Inserted | ChangeKind::Updated)
                    ) {
                        self.record_change(id, kind, change.entity);
                    }
                }
                (_, None) => {}
            }
        }
    }

    /// Forgets every pending change after a successful save or promotion.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
        self.prune();
    }

    fn record_change(&mut self, id: RecordId, kind: ChangeKind, entity: Arc<RecordType>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.changes.insert(id, PendingChange { kind, entity, seq });
    }

    fn ordered_changes(&self) -> Vec<(&RecordId, &PendingChange)> {
        let mut ordered: Vec<_> = self.changes.iter().collect();
        ordered.sort_by_key(|(_, change)| change.seq);
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeKind, SessionState};
    use crate::db::RecordWrite;
    use crate::error::StackError;
    use crate::model::schema::{FieldDef, FieldKind, RecordType, Schema};
    use crate::model::record::RecordId;
    use crate::model::value::Value;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn state() -> SessionState {
        let user = RecordType::new("User")
            .with_field(FieldDef::required("name", FieldKind::Text))
            .with_field(FieldDef::optional("age", FieldKind::Integer));
        SessionState::new(Arc::new(Schema::new("Model", 1, vec![user]).unwrap()))
    }

    #[test]
    fn deleting_a_pending_insert_forgets_it() {
        let mut state = state();
        let user = state.describe("User").unwrap();
        let (id, _anchor) = state.insert(user);
        state.delete(id).unwrap();

        assert!(!state.has_changes());
        assert!(state.change_set().is_empty());
        assert!(matches!(state.delete(id), Err(StackError::Invalidated(_))));
    }

    #[test]
    fn set_rejects_unknown_fields_and_kind_mismatches() {
        let mut state = state();
        let user = state.describe("User").unwrap();
        let (id, _anchor) = state.insert(user);

        assert_eq!(
            state.set(id, "nickname", Value::from("x")).unwrap_err().code(),
            "validation_failed"
        );
        assert_eq!(
            state.set(id, "age", Value::from("old")).unwrap_err().code(),
            "validation_failed"
        );
        state.set(id, "age", Value::from(31)).unwrap();
        assert_eq!(state.object(&id).unwrap().fields["age"], Value::Integer(31));
    }

    #[test]
    fn validation_reports_missing_required_fields() {
        let mut state = state();
        let user = state.describe("User").unwrap();
        let (id, _anchor) = state.insert(user);
        assert_eq!(state.validate_pending().unwrap_err().code(), "validation_failed");

        state.set(id, "name", Value::from("Ada")).unwrap();
        state.validate_pending().unwrap();
        assert!(matches!(
            state.change_set().writes.as_slice(),
            [RecordWrite::Insert { .. }]
        ));
    }

    #[test]
    fn absorb_collapses_delete_of_parent_insert() {
        let mut parent = state();
        let user = parent.describe("User").unwrap();
        let (id, _anchor) = parent.insert(user.clone());

        let mut child = state();
        let _handle = child.register(id, &user, parent.object(&id).unwrap().fields.clone());
        child.delete(id).unwrap();

        parent.absorb(child.promotions());
        assert!(!parent.has_changes());
        assert!(parent.object(&id).is_err());
    }

    #[test]
    fn absorb_keeps_parent_insert_kind_for_child_updates() {
        let mut parent = state();
        let user = parent.describe("User").unwrap();
        let (id, _anchor) = parent.insert(user.clone());

        let mut child = state();
        let _handle = child.register(id, &user, parent.object(&id).unwrap().fields.clone());
        child.set(id, "name", Value::from("Grace")).unwrap();

        parent.absorb(child.promotions());
        let overlay = parent.overlay();
        assert_eq!(overlay.len(), 1);
        assert_eq!(
            overlay[0].fields.as_ref().unwrap()["name"],
            Value::from("Grace")
        );
        assert_eq!(parent.changes[&id].kind, ChangeKind::Inserted);
    }

    #[test]
    fn prune_drops_only_unreferenced_unchanged_objects() {
        let mut state = state();
        let user = state.describe("User").unwrap();
        let (pending, pending_anchor) = state.insert(user.clone());
        drop(pending_anchor);

        let held = RecordId::new_v4();
        let dropped = RecordId::new_v4();
        let held_anchor = state.register(held, &user, BTreeMap::new());
        drop(state.register(dropped, &user, BTreeMap::new()));

        assert_eq!(state.prune(), 1);
        assert!(state.object(&pending).is_ok());
        assert!(state.object(&held).is_ok());
        assert!(state.object(&dropped).is_err());

        let again = state.register(held, &user, BTreeMap::new());
        assert!(Arc::ptr_eq(&again, &held_anchor));
        drop((again, held_anchor));
        state.clear_changes();
        assert!(state.object(&pending).is_err());
        assert!(state.object(&held).is_err());
    }

    #[test]
    fn unknown_types_are_reported() {
        let mut state = state();
        assert!(matches!(
            state.describe("Invoice"),
            Err(StackError::UnknownType(name)) if name == "Invoice"
        ));
    }
}
