use recordstack_core::{
    ErrorKind, FetchRequest, FieldDef, FieldKind, MutationService, Predicate, QueryService,
    Record, RecordId, RecordType, Schema, SchemaCatalog, Session, SessionManager, StackConfig,
    StackError, Value,
};

#[test]
fn count_matches_retrieve_length_over_stored_and_pending_rows() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);

    add_user(&mutations, &main, "Zed", 33);
    let stored = queries
        .retrieve_first(&FetchRequest::new("User").ascending("age"), Some(&main))
        .unwrap()
        .unwrap();
    mutations.delete(&stored, None, false).unwrap();

    for request in [
        FetchRequest::new("User"),
        FetchRequest::new("User").filter(Predicate::ge("age", 30)),
        FetchRequest::new("User").filter(Predicate::contains_ignore_case("name", "E")),
    ] {
        let records = queries.retrieve(&request, Some(&main)).unwrap();
        assert_eq!(queries.count(&request, Some(&main)).unwrap(), records.len());
    }
    assert_eq!(
        queries.count(&FetchRequest::new("User"), Some(&main)).unwrap(),
        SEED.len()
    );
}

#[test]
fn batch_size_never_changes_results() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);
    add_user(&mutations, &main, "Pia", 30);
    add_user(&mutations, &main, "Quin", 18);

    let request = FetchRequest::new("User").descending("age").ascending("name");
    let expected = ids(&queries.retrieve(&request, Some(&main)).unwrap());
    assert_eq!(expected.len(), SEED.len() + 2);

    for batch in [1, 2, 3, 7, 100] {
        let paged = request.clone().batch_size(batch);
        assert_eq!(ids(&queries.retrieve(&paged, Some(&main)).unwrap()), expected);
        let limited = paged.limit(4);
        assert_eq!(
            ids(&queries.retrieve(&limited, Some(&main)).unwrap()),
            expected[..4].to_vec()
        );
    }
}

#[test]
fn pending_and_stored_rows_merge_in_sort_order() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);
    add_user(&mutations, &main, "Mid", 27);

    let request = FetchRequest::new("User").ascending("age");
    let ages: Vec<i64> = queries
        .retrieve(&request, Some(&main))
        .unwrap()
        .iter()
        .map(|record| record.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![19, 25, 27, 30, 30, 41]);
}

#[test]
fn retrieve_first_is_head_of_limited_retrieve_and_reads_are_idempotent() {
    let manager = seeded_manager();
    let queries = QueryService::new(&manager);
    let request = FetchRequest::new("User")
        .filter(Predicate::gt("age", 20))
        .descending("age");

    let first = queries.retrieve_first(&request, None).unwrap().unwrap();
    let head = queries.retrieve(&request.clone().limit(1), None).unwrap();
    assert_eq!(head, vec![first.clone()]);
    assert_eq!(first.get("name").unwrap(), Value::from("Carl"));

    let once = ids(&queries.retrieve(&request, None).unwrap());
    let twice = ids(&queries.retrieve(&request, None).unwrap());
    assert_eq!(once, twice);
    assert_eq!(queries.count(&request, None).unwrap(), once.len());

    let none = FetchRequest::new("User").filter(Predicate::gt("age", 99));
    assert!(queries.retrieve_first(&none, None).unwrap().is_none());
}

#[test]
fn background_reads_see_main_pending_changes_but_not_vice_versa() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let background = manager.background_session().unwrap();
    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);
    let senior = FetchRequest::new("User").filter(Predicate::ge("age", 90));

    let carl = queries
        .retrieve_first(
            &FetchRequest::new("User").filter(Predicate::eq("name", "Carl")),
            Some(&main),
        )
        .unwrap()
        .unwrap();
    carl.set("age", 95).unwrap();
    assert_eq!(queries.count(&senior, Some(&main)).unwrap(), 1);
    assert_eq!(queries.count(&senior, Some(&background)).unwrap(), 1);

    add_user(&mutations, &background, "Old", 99);
    assert_eq!(queries.count(&senior, Some(&background)).unwrap(), 2);
    assert_eq!(queries.count(&senior, Some(&main)).unwrap(), 1);
}

#[test]
fn null_tests_and_in_lists_filter_optional_fields() {
    let manager = seeded_manager();
    let queries = QueryService::new(&manager);
    let main = manager.main_session().unwrap();
    let ben = queries
        .retrieve_first(
            &FetchRequest::new("User").filter(Predicate::eq("name", "Ben")),
            None,
        )
        .unwrap()
        .unwrap();
    ben.set("nickname", "B").unwrap();

    let without = FetchRequest::new("User").filter(Predicate::is_null("nickname"));
    assert_eq!(queries.count(&without, Some(&main)).unwrap(), SEED.len() - 1);

    let textual = FetchRequest::new("User")
        .filter_str("nickname != nil OR name IN {'Ann', 'Dora'}")
        .unwrap();
    assert_eq!(queries.count(&textual, Some(&main)).unwrap(), 3);

    let lower = FetchRequest::new("User").filter(Predicate::lt("nickname", "Z"));
    assert_eq!(queries.count(&lower, Some(&main)).unwrap(), 1);
}

#[test]
fn invalid_requests_are_rejected() {
    let manager = seeded_manager();
    let queries = QueryService::new(&manager);

    let unknown_type = queries.retrieve(&FetchRequest::new("Invoice"), None).unwrap_err();
    assert_eq!(unknown_type.kind(), ErrorKind::UnknownType);

    let unknown_field = FetchRequest::new("User").filter(Predicate::eq("email", "x"));
    assert_eq!(
        queries.count(&unknown_field, None).unwrap_err().kind(),
        ErrorKind::InvalidFilter
    );

    let wrong_kind = FetchRequest::new("User").filter(Predicate::eq("age", "old"));
    assert_eq!(
        queries.retrieve(&wrong_kind, None).unwrap_err().kind(),
        ErrorKind::InvalidFilter
    );

    let unknown_sort = FetchRequest::new("User").descending("email");
    assert_eq!(
        queries.retrieve(&unknown_sort, None).unwrap_err().kind(),
        ErrorKind::InvalidFilter
    );

    let malformed: StackError = FetchRequest::new("User")
        .filter_str("age <")
        .unwrap_err()
        .into();
    assert_eq!(malformed.kind(), ErrorKind::InvalidFilter);
}

#[test]
fn default_batch_size_from_config_keeps_results() {
    let manager = seeded_manager_with(StackConfig::in_memory().with_default_batch_size(2));
    let queries = QueryService::new(&manager);
    let request = FetchRequest::new("User").ascending("name");
    let names: Vec<Value> = queries
        .retrieve(&request, None)
        .unwrap()
        .iter()
        .map(|record| record.get("name").unwrap())
        .collect();
    let expected: Vec<Value> = ["Ann", "Ben", "Carl", "Dora", "Eve"]
        .into_iter()
        .map(Value::from)
        .collect();
    assert_eq!(names, expected);
}

#[test]
fn large_pending_sets_still_read_and_count() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let queries = QueryService::new(&manager);
    let bulk: usize = 33_000;

    main.perform(move |scope| {
        for index in 0..bulk {
            let record = scope.insert("User")?;
            scope.set(&record, "name", format!("bulk{index}"))?;
            scope.set(&record, "age", 50)?;
        }
        Ok(())
    })
    .unwrap();

    let users = FetchRequest::new("User");
    assert_eq!(queries.count(&users, Some(&main)).unwrap(), SEED.len() + bulk);
    let young = users.clone().filter(Predicate::lt("age", 26)).ascending("age");
    let ages: Vec<i64> = queries
        .retrieve(&young, Some(&main))
        .unwrap()
        .iter()
        .map(|record| record.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![19, 25]);
}

#[test]
fn integer_fields_compare_exactly_against_real_literals() {
    let manager = seeded_manager();
    let main = manager.main_session().unwrap();
    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);
    let big = 9_007_199_254_740_993_i64;

    add_user(&mutations, &main, "Saved", big);
    manager.save_main().unwrap();
    add_user(&mutations, &main, "Pending", big);

    let above = FetchRequest::new("User")
        .filter(Predicate::gt("age", 9_007_199_254_740_992.0))
        .ascending("name");
    let names: Vec<Value> = queries
        .retrieve(&above, Some(&main))
        .unwrap()
        .iter()
        .map(|record| record.get("name").unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("Pending"), Value::from("Saved")]);

    let equal = FetchRequest::new("User").filter(Predicate::eq("age", 9_007_199_254_740_992.0));
    assert_eq!(queries.count(&equal, Some(&main)).unwrap(), 0);
}

const SEED: [(&str, i64); 5] = [
    ("Ann", 30),
    ("Ben", 25),
    ("Carl", 41),
    ("Dora", 30),
    ("Eve", 19),
];

fn seeded_manager() -> SessionManager {
    seeded_manager_with(StackConfig::in_memory())
}

fn seeded_manager_with(config: StackConfig) -> SessionManager {
    let user = RecordType::new("User")
        .with_field(FieldDef::required("name", FieldKind::Text))
        .with_field(FieldDef::required("age", FieldKind::Integer))
        .with_field(FieldDef::optional("nickname", FieldKind::Text));
    let catalog = SchemaCatalog::new()
        .with_schema(Schema::new("Model", 1, vec![user]).unwrap())
        .unwrap();
    let manager = SessionManager::new(config, catalog);
    manager.setup("Model").unwrap();

    let mutations = MutationService::new(&manager);
    let main = manager.main_session().unwrap();
    for (name, age) in SEED {
        add_user(&mutations, &main, name, age);
    }
    manager.save_main().unwrap();
    manager
}

fn add_user(mutations: &MutationService<'_>, session: &Session, name: &str, age: i64) -> Record {
    let record = mutations.insert("User", Some(session)).unwrap();
    record.set("name", name).unwrap();
    record.set("age", age).unwrap();
    record
}

fn ids(records: &[Record]) -> Vec<RecordId> {
    records.iter().map(Record::id).collect()
}
