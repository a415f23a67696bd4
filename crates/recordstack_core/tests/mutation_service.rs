use recordstack_core::{
    ErrorKind, FetchRequest, FieldDef, FieldKind, MutationService, Predicate, QueryService,
    Record, RecordType, Schema, SchemaCatalog, Session, SessionManager, StackConfig, StackError,
    ValidationReason, Value,
};

#[test]
fn delete_through_foreign_session_is_rejected() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let main = manager.main_session().unwrap();
    let background = manager.background_session().unwrap();
    let record = add_user(&mutations, &background, "Ann", 20);

    let err = mutations.delete(&record, Some(&main), false).unwrap_err();
    assert!(matches!(err, StackError::WrongSession { record_id } if record_id == record.id()));

    let handle = record.clone();
    let err = main
        .perform(move |scope| scope.get(&handle, "name"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongSession);
}

#[test]
fn deleted_records_are_invalidated() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let queries = QueryService::new(&manager);
    let main = manager.main_session().unwrap();
    let pending = add_user(&mutations, &main, "Ann", 20);

    mutations.delete(&pending, None, false).unwrap();
    assert_eq!(pending.get("name").unwrap_err().kind(), ErrorKind::Invalidated);
    assert_eq!(
        mutations.delete(&pending, None, false).unwrap_err().kind(),
        ErrorKind::Invalidated
    );
    assert!(!main.has_changes().unwrap());

    let stored = add_user(&mutations, &main, "Ben", 30);
    manager.save_main().unwrap();
    mutations.delete(&stored, None, true).unwrap();
    assert!(!main.has_changes().unwrap());
    assert_eq!(queries.count(&FetchRequest::new("User"), None).unwrap(), 0);
    assert_eq!(stored.set("age", 31).unwrap_err().kind(), ErrorKind::Invalidated);
}

#[test]
fn delete_all_without_save_stays_pending_until_saved() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let queries = QueryService::new(&manager);
    let main = manager.main_session().unwrap();
    let background = manager.background_session().unwrap();
    for (name, age) in [("Ann", 20), ("Ben", 30), ("Cid", 40)] {
        add_user(&mutations, &main, name, age);
    }
    manager.save_main().unwrap();

    let adults = FetchRequest::new("User").filter(Predicate::ge("age", 30));
    assert_eq!(mutations.delete_all(&adults, Some(&background), false).unwrap(), 2);
    assert_eq!(queries.count(&adults, Some(&background)).unwrap(), 0);
    assert_eq!(queries.count(&adults, Some(&main)).unwrap(), 2);

    manager.save_background().unwrap();
    assert_eq!(queries.count(&adults, Some(&main)).unwrap(), 0);
    assert!(!main.has_changes().unwrap());

    let nobody = FetchRequest::new("User").filter(Predicate::gt("age", 90));
    assert_eq!(mutations.delete_all(&nobody, None, true).unwrap(), 0);
    assert_eq!(queries.count(&FetchRequest::new("User"), None).unwrap(), 1);
}

#[test]
fn background_updates_and_deletes_propagate_to_main_handles() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let queries = QueryService::new(&manager);
    let main = manager.main_session().unwrap();
    let background = manager.background_session().unwrap();
    let ann_main = add_user(&mutations, &main, "Ann", 20);
    let ben_main = add_user(&mutations, &main, "Ben", 30);
    manager.save_main().unwrap();

    let by_name = |name: &str| FetchRequest::new("User").filter(Predicate::eq("name", name));
    let ann_background = queries
        .retrieve_first(&by_name("Ann"), Some(&background))
        .unwrap()
        .unwrap();
    let ben_background = queries
        .retrieve_first(&by_name("Ben"), Some(&background))
        .unwrap()
        .unwrap();
    assert_ne!(ann_background, ann_main);

    ann_background.set("age", 21).unwrap();
    mutations.delete(&ben_background, None, false).unwrap();
    assert_eq!(ann_main.get("age").unwrap(), Value::from(20));

    manager.save_background().unwrap();
    assert_eq!(ann_main.get("age").unwrap(), Value::from(21));
    assert_eq!(ben_main.get("name").unwrap_err().kind(), ErrorKind::Invalidated);
    assert_eq!(queries.count(&FetchRequest::new("User"), Some(&main)).unwrap(), 1);
    assert!(!background.has_changes().unwrap());
    assert!(!main.has_changes().unwrap());
}

#[test]
fn failed_validation_keeps_pending_changes() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let queries = QueryService::new(&manager);
    let main = manager.main_session().unwrap();
    let background = manager.background_session().unwrap();

    let unnamed = mutations.insert("User", Some(&background)).unwrap();
    let err = manager.save_background().unwrap_err();
    match &err {
        StackError::Validation(detail) => {
            assert_eq!(detail.field, "name");
            assert_eq!(detail.reason, ValidationReason::MissingRequired);
            assert_eq!(detail.record_id, Some(unnamed.id()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(background.has_changes().unwrap());
    assert!(!main.has_changes().unwrap());

    unnamed.set("name", "Ann").unwrap();
    manager.save_background().unwrap();
    let saved = queries
        .retrieve_first(&FetchRequest::new("User"), Some(&main))
        .unwrap()
        .unwrap();
    assert_eq!(saved.get("age").unwrap(), Value::from(18));
}

#[test]
fn field_writes_are_checked_against_the_record_type() {
    let manager = manager();
    let mutations = MutationService::new(&manager);
    let record = mutations.insert("User", None).unwrap();

    assert_eq!(
        record.set("age", "old").unwrap_err().kind(),
        ErrorKind::ValidationFailed
    );
    assert_eq!(
        record.set("email", "a@b").unwrap_err().kind(),
        ErrorKind::ValidationFailed
    );
    assert_eq!(
        record.get("email").unwrap_err().kind(),
        ErrorKind::ValidationFailed
    );

    record.set("score", 7).unwrap();
    assert_eq!(record.get("score").unwrap(), Value::Real(7.0));
    record.set("score", Value::Null).unwrap();
    assert_eq!(record.values().unwrap()["score"], Value::Null);
    assert_eq!(
        mutations.insert("Invoice", None).unwrap_err().kind(),
        ErrorKind::UnknownType
    );
}

fn manager() -> SessionManager {
    let user = RecordType::new("User")
        .with_field(FieldDef::required("name", FieldKind::Text))
        .with_field(FieldDef::required("age", FieldKind::Integer).with_default(18))
        .with_field(FieldDef::optional("score", FieldKind::Real));
    let catalog = SchemaCatalog::new()
        .with_schema(Schema::new("Model", 1, vec![user]).unwrap())
        .unwrap();
    let manager = SessionManager::new(StackConfig::in_memory(), catalog);
    manager.setup("Model").unwrap();
    manager
}

fn add_user(mutations: &MutationService<'_>, session: &Session, name: &str, age: i64) -> Record {
    let record = mutations.insert("User", Some(session)).unwrap();
    record.set("name", name).unwrap();
    record.set("age", age).unwrap();
    record
}
