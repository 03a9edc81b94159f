use redmap::*;
use serde_json::json;
use std::sync::Arc;

const SCHEMA: &str = r#"{
    "default_behaviors": ["Identify", "AutoAssociate", "DeepSave", "Timestamp"],
    "tables": [
        {
            "kind": "Project",
            "indexes": ["owner_id", ["owner_id", "status"]],
            "associations": { "owner": "BelongsTo User", "roles": "HasMany Role" }
        },
        { "kind": "User" },
        {
            "kind": "Role",
            "indexes": ["project_id"],
            "associations": { "project": "BelongsTo Project" }
        }
    ]
}"#;

fn database() -> (Database, Arc<MemoryConnection>) {
    let conn = Arc::new(MemoryConnection::journaled());
    let config = SchemaConfig::from_json(SCHEMA).unwrap();
    let db = Database::from_config(conn.clone(), &config, &Registry::with_builtins(), "db:").unwrap();
    (db, conn)
}

fn ids(models: Vec<Model>) -> Vec<String> {
    let mut ids: Vec<String> = models.iter().map(|m| m.get_attribute("id").unwrap().as_str().unwrap().to_string()).collect();
    ids.sort();
    ids
}

#[test]
fn keys_follow_the_storage_format() {
    let (db, _) = database();
    let table = db.table("Project").unwrap();
    assert_eq!(table.get_key(&attrs! { "id" => "test" }).unwrap(), "db:Project?id=test");
    assert_eq!(table.get_key(&attrs! { "status" => "done", "owner_id" => "test" }).unwrap(), "db:Project?owner_id=test&status=done");
    assert_eq!(table.get_key(&attrs! {}).unwrap(), "db:Project?");
}

#[test]
fn identify_assigns_keys_at_construction() {
    let (db, _) = database();
    let project = db.create("Project", attrs! { "title" => "x" }).unwrap();
    let id = project.get_attribute("id").and_then(|v| v.as_str()).unwrap();
    assert_eq!(id.len(), 36);
    assert!(project.is_new());

    let explicit = db.create("Project", attrs! { "id" => "test" }).unwrap();
    assert_eq!(explicit.get_attribute("id"), Some(&json!("test")));
}

#[test]
fn save_clears_the_changed_set_and_stamps_times() {
    let (db, _) = database();
    let mut project = db.create("Project", attrs! { "id" => "p" }).unwrap();
    project.set_attribute("x", 1);
    assert!(project.has_changed());
    assert!(db.save(&mut project).unwrap());
    assert!(!project.has_changed());
    assert!(project.has_attribute("createdAt") && project.has_attribute("updatedAt"));

    let loaded = db.find("Project", &attrs! { "id" => "p" }).unwrap();
    assert_eq!(loaded.attributes(), project.attributes());
    assert!(!loaded.is_new());
}

#[test]
fn find_all_by_returns_exactly_the_matching_records() {
    let (db, _) = database();
    for (id, owner, status) in [("a", "u1", "open"), ("b", "u1", "done"), ("c", "u2", "open")] {
        let mut project = db.create("Project", attrs! { "id" => id, "owner_id" => owner, "status" => status }).unwrap();
        db.save(&mut project).unwrap();
    }
    let by_owner = db.find_all_by("Project", &attrs! { "owner_id" => "u1" }).unwrap();
    assert_eq!(ids(by_owner.to_vec().unwrap()), vec!["a", "b"]);

    let grouped = db.find_all_by("Project", &attrs! { "owner_id" => "u1", "status" => "done" }).unwrap();
    assert_eq!(grouped.plan(), &Plan::Scan("db:Project?owner_id=u1&status=done".into()));
    assert_eq!(ids(grouped.to_vec().unwrap()), vec!["b"]);

    let none = db.find_all_by("Project", &attrs! { "owner_id" => "nobody" }).unwrap();
    assert!(none.first().unwrap().is_none());

    assert!(matches!(db.find_all_by("Project", &attrs! { "status" => "open" }), Err(AppError::QueryNotSupported(_))));
}

#[test]
fn find_all_by_re_executes_on_every_iteration() {
    let (db, _) = database();
    let mut first = db.create("Project", attrs! { "id" => "a", "owner_id" => "u" }).unwrap();
    db.save(&mut first).unwrap();
    let all = db.find_all_by("Project", &attrs! { "owner_id" => "u" }).unwrap();
    assert_eq!((&all).into_iter().count(), 1);

    let mut second = db.create("Project", attrs! { "id" => "b", "owner_id" => "u" }).unwrap();
    db.save(&mut second).unwrap();
    assert_eq!(all.iter().count(), 2);

    first.set_attribute("owner_id", "other");
    db.save(&mut first).unwrap();
    assert_eq!(ids(all.to_vec().unwrap()), vec!["b"]);
    assert_eq!(all.keys().unwrap(), vec!["db:Project?id=b".to_string()]);
}

#[test]
fn belongs_to_round_trips() {
    let (db, _) = database();
    let mut user = db.create("User", attrs! { "id" => "u" }).unwrap();
    let mut project = db.create("Project", attrs! { "id" => "p" }).unwrap();
    db.associate(&mut project, "owner", &mut user).unwrap();
    assert_eq!(project.get_attribute("owner_id"), Some(&json!("u")));
    db.save(&mut user).unwrap();
    db.save(&mut project).unwrap();

    let owner = db.associated(&project, "owner").unwrap().into_models().unwrap();
    assert_eq!(owner[0].primary_key(), user.primary_key());
}

#[test]
fn missing_associations_are_not_found() {
    let (db, _) = database();
    let mut project = db.create("Project", attrs! { "id" => "p" }).unwrap();
    db.save(&mut project).unwrap();
    let err = db.associated(&project, "owner").err().unwrap();
    assert!(matches!(err, AppError::AssociationNotFound(_)) && err.is_not_found());

    project.set_attribute("owner_id", "ghost");
    let err = db.associated(&project, "owner").err().unwrap();
    assert!(matches!(err, AppError::RecordNotFound(_)) && err.is_not_found());

    assert!(matches!(db.associated(&project, "tasks"), Err(AppError::AssociationNotFound(_))));
}

#[test]
fn deep_save_persists_the_association_graph() {
    let (db, _) = database();
    let mut project = db.create("Project", attrs! { "id" => "p" }).unwrap();
    let owner = db.create("User", attrs! { "id" => "u", "name" => "ann" }).unwrap();
    let roles = vec![db.create("Role", attrs! { "name" => "dev" }).unwrap(), db.create("Role", attrs! { "name" => "ops" }).unwrap()];
    project.relate("owner", owner);
    project.relate_many("roles", roles);
    assert!(db.save(&mut project).unwrap());

    assert_eq!(project.get_attribute("owner_id"), Some(&json!("u")));
    assert_eq!(db.find("User", &attrs! { "id" => "u" }).unwrap().get_attribute("name"), Some(&json!("ann")));

    let stored = db.associated(&project, "roles").unwrap().into_models().unwrap();
    let mut names: Vec<&str> = stored.iter().map(|r| r.get_attribute("name").unwrap().as_str().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["dev", "ops"]);
    assert!(stored.iter().all(|r| r.get_attribute("project_id") == Some(&json!("p"))));
}

#[test]
fn load_associated_fills_the_cache() {
    let (db, _) = database();
    let mut project = db.create("Project", attrs! { "id" => "p" }).unwrap();
    project.relate_many("roles", vec![db.create("Role", attrs! { "id" => "r" }).unwrap()]);
    db.save(&mut project).unwrap();

    let mut loaded = db.find("Project", &attrs! { "id" => "p" }).unwrap();
    assert!(loaded.related("roles").is_none());
    let roles = db.load_associated(&mut loaded, "roles").unwrap();
    assert_eq!(roles.models().len(), 1);
    assert_eq!(loaded.related("roles").unwrap().models()[0].get_attribute("id"), Some(&json!("r")));
}

#[test]
fn delete_removes_the_record_and_its_index_entries() {
    let (db, conn) = database();
    let mut project = db.create("Project", attrs! { "id" => "p", "owner_id" => "u" }).unwrap();
    db.save(&mut project).unwrap();
    assert!(db.delete(&mut project).unwrap());
    assert!(matches!(db.find("Project", &attrs! { "id" => "p" }), Err(AppError::RecordNotFound(_))));
    assert!(conn.smembers("db:Project?owner_id=u").unwrap().is_empty());
    assert!(project.is_new());
}
