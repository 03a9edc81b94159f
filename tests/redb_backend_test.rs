use redmap::*;
use serde_json::json;
use std::sync::Arc;

const SCHEMA: &str = r#"{
    "default_behaviors": ["Identify", "AutoAssociate", "DeepSave"],
    "tables": [
        { "kind": "User", "indexes": ["team"], "associations": { "projects": "HasMany Project" } },
        { "kind": "Project", "indexes": ["user_id"] }
    ]
}"#;

fn database(conn: Arc<dyn Connection>) -> Database {
    Database::from_config(conn, &SchemaConfig::from_json(SCHEMA).unwrap(), &Registry::with_builtins(), "db:").unwrap()
}

#[test]
fn records_and_indexes_live_in_redb() {
    let db = database(create_random_storage("redb_indexes").unwrap());
    let mut user = db.create("User", attrs! { "id" => "u", "team" => "core" }).unwrap();
    user.relate_many("projects", vec![db.create("Project", attrs! { "id" => "p1" }).unwrap(), db.create("Project", attrs! { "id" => "p2" }).unwrap()]);
    assert!(db.save(&mut user).unwrap());

    let core = db.find_all_by("User", &attrs! { "team" => "core" }).unwrap().to_vec().unwrap();
    assert_eq!(core.len(), 1);
    let projects = db.associated(&user, "projects").unwrap().into_models().unwrap();
    assert_eq!(projects.len(), 2);
    assert!(projects.iter().all(|p| p.get_attribute("user_id") == Some(&json!("u"))));

    user.set_attribute("team", "ops");
    db.save(&mut user).unwrap();
    assert!(db.find_all_by("User", &attrs! { "team" => "core" }).unwrap().first().unwrap().is_none());
    assert!(db.find_all_by("User", &attrs! { "team" => "ops" }).unwrap().first().unwrap().is_some());
}

#[test]
fn records_survive_reopening_the_file() {
    let path = std::env::temp_dir().join("redmap").join(format!("reopen_{}.redb", rand_suffix()));
    {
        let db = database(Arc::new(RedbConnection::open(&path).unwrap()));
        let mut user = db.create("User", attrs! { "id" => "u", "team" => "core" }).unwrap();
        db.save(&mut user).unwrap();
        assert_eq!(db.next_unique("User", "id").unwrap(), 1);
    }
    let db = database(Arc::new(RedbConnection::open(&path).unwrap()));
    assert_eq!(db.find("User", &attrs! { "id" => "u" }).unwrap().get_attribute("team"), Some(&json!("core")));
    assert_eq!(db.find_all_by("User", &attrs! { "team" => "core" }).unwrap().keys().unwrap(), vec!["db:User?id=u".to_string()]);
    assert_eq!(db.next_unique("User", "id").unwrap(), 2);
}

fn rand_suffix() -> u128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
}
