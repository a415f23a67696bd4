//! CLI smoke entry point.
//!
//! # Responsibility
//! - Run the reference `User` scenario against an in-memory stack.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `RECORDSTACK_LOG_DIR` (absolute path) to also write core logs.

use log::info;
use recordstack_core::{
    FetchRequest, FieldDef, FieldKind, MutationService, Predicate, QueryService, RecordType,
    Schema, SchemaCatalog, SessionManager, StackConfig, StackResult,
};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Ok(dir) = std::env::var("RECORDSTACK_LOG_DIR") {
        if let Err(err) = recordstack_core::init_logging(recordstack_core::default_log_level(), &dir)
        {
            eprintln!("logging disabled: {err}");
        }
    }

    println!("recordstack_core version={}", recordstack_core::core_version());
    match run_scenario() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("scenario failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_scenario() -> Result<(), Box<dyn Error>> {
    let user = RecordType::new("User")
        .with_field(FieldDef::required("id", FieldKind::Integer))
        .with_field(FieldDef::required("name", FieldKind::Text))
        .with_field(FieldDef::required("age", FieldKind::Integer));
    let catalog = SchemaCatalog::new().with_schema(Schema::new("Model", 1, vec![user])?)?;

    let manager = SessionManager::new(StackConfig::in_memory(), catalog);
    manager.setup("Model")?;
    info!("event=cli_scenario module=cli status=start");

    let queries = QueryService::new(&manager);
    let mutations = MutationService::new(&manager);
    let background = manager.background_session()?;
    let main = manager.main_session()?;
    let users = FetchRequest::new("User");

    for (id, (name, age)) in [("Ann", 20), ("Ben", 30), ("Cid", 40)].into_iter().enumerate() {
        let record = mutations.insert("User", Some(&background))?;
        record.set("id", i64::try_from(id).unwrap_or(i64::MAX))?;
        record.set("name", name)?;
        record.set("age", age)?;
    }
    println!(
        "background count={} main count={}",
        queries.count(&users, Some(&background))?,
        queries.count(&users, Some(&main))?
    );

    manager.save_background()?;
    println!("after save_background main count={}", queries.count(&users, Some(&main))?);

    let oldest = users.clone().descending("age").limit(2);
    let ages = queries
        .retrieve(&oldest, Some(&main))?
        .iter()
        .map(|record| record.get("age").map(|age| age.to_string()))
        .collect::<StackResult<Vec<_>>>()?;
    println!("oldest two ages=[{}]", ages.join(", "));

    let young = users.clone().filter(Predicate::lt("age", 25));
    let deleted = mutations.delete_all(&young, None, true)?;
    println!(
        "deleted={deleted} remaining={}",
        queries.count(&users, None)?
    );

    manager.clear()?;
    info!("event=cli_scenario module=cli status=ok");
    Ok(())
}
