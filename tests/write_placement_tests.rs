//! Three-tier write placement against real files.

use confstack::settings::ConfigFeature;
use confstack::{
    ConfigFactory, ConfigFactoryBuilder, EntryType, EntryValue, ErrorReason, Scope, ScopeSet,
};
use confstack::scheme::{ConfigScheme, EntrySpec, Validator};
use tempfile::TempDir;

fn factory_with_dirs(dirs: Vec<String>) -> ConfigFactory {
    ConfigFactoryBuilder::new("Acme", "Widget")
        .unwrap()
        .set_bool(ConfigFeature::PermitTestMode, true)
        .unwrap()
        .set_bool(ConfigFeature::TestMode, true)
        .unwrap()
        .set_text_list(ConfigFeature::TestmodeDirectories, dirs)
        .unwrap()
        .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
        .unwrap()
        .set_bool(ConfigFeature::ExceptionOnMissingEntry, false)
        .unwrap()
        .build()
        .unwrap()
}

fn file_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn tier1_updates_existing_entry_in_place() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.properties");
    std::fs::write(&file, "k=old\nuntouched=keep\n").unwrap();

    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config("app").unwrap();
    config.put_string("k", "updated", Scope::User).unwrap();

    let content = std::fs::read_to_string(&file).unwrap();
    assert!(content.contains("k=updated"));
    assert!(content.contains("untouched=keep"));
    assert_eq!(file_count(dir.path()), 1, "no new file may appear");
}

#[test]
fn tier2_appends_into_existing_writable_layer() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.properties");
    std::fs::write(&file, "existing=1\n").unwrap();

    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config("app").unwrap();
    config.put_string("added/key", "2", Scope::User).unwrap();

    let content = std::fs::read_to_string(&file).unwrap();
    assert!(content.contains("existing=1"));
    assert!(content.contains("added/key=2"));
    assert_eq!(file_count(dir.path()), 1);
}

#[test]
fn tier3_creates_layer_and_directories() {
    let base = TempDir::new().unwrap();
    let nested = base.path().join("does/not/exist/yet");

    let factory = factory_with_dirs(vec![format!("USER:{}", nested.display())]);
    let config = factory.config("fresh").unwrap();
    config.put_string("brand/new", "value", Scope::User).unwrap();

    let created = nested.join("fresh.properties");
    assert!(created.is_file());
    assert!(std::fs::read_to_string(&created)
        .unwrap()
        .contains("brand/new=value"));
    assert_eq!(config.get_string("brand/new").unwrap().unwrap(), "value");
}

#[test]
fn multi_scope_write_updates_only_most_specific_source() {
    let user_dir = TempDir::new().unwrap();
    let app_dir = TempDir::new().unwrap();
    std::fs::write(user_dir.path().join("app.properties"), "k=user\n").unwrap();
    std::fs::write(app_dir.path().join("app.properties"), "k=app\n").unwrap();

    let factory = factory_with_dirs(vec![
        format!("USER:{}", user_dir.path().display()),
        format!("APPLICATION:{}", app_dir.path().display()),
    ]);
    let config = factory.config("app").unwrap();
    config
        .put_value_in(
            "k",
            EntryValue::Text("updated".into()),
            ScopeSet::of(&[Scope::User, Scope::Application]),
        )
        .unwrap();

    assert!(std::fs::read_to_string(user_dir.path().join("app.properties"))
        .unwrap()
        .contains("k=updated"));
    // The less specific source is untouched.
    assert_eq!(
        std::fs::read_to_string(app_dir.path().join("app.properties")).unwrap(),
        "k=app\n"
    );
}

#[test]
fn rejected_write_leaves_all_state_unchanged() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.properties");
    std::fs::write(&file, "limit=5\n").unwrap();
    let before = std::fs::read_to_string(&file).unwrap();

    let scheme = ConfigScheme::builder()
        .entry(
            EntrySpec::new("limit", EntryType::Number)
                .with_validator(Validator::IntegerRange { min: 0, max: 10 }),
        )
        .build();
    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config_with_scheme("app", scheme).unwrap();

    let err = config.put_i64("limit", 999, Scope::User).unwrap_err();
    assert_eq!(err.reason, ErrorReason::InputInvalid);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
    assert_eq!(file_count(dir.path()), 1);
}

#[test]
fn runtime_writes_do_not_survive_reinstantiation() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.properties"), "persistent=disk\n").unwrap();

    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config("app").unwrap();
    config.put_string("volatile", "only-here", Scope::Runtime).unwrap();
    assert_eq!(
        config.get_string("volatile").unwrap().unwrap(),
        "only-here"
    );

    // Rebuild: close the instance so the factory's weak cache entry dies.
    config.close();
    let rebuilt = factory.config("app").unwrap();
    assert_eq!(
        rebuilt.get_string("persistent").unwrap().unwrap(),
        "disk"
    );
    assert_eq!(rebuilt.get_string("volatile").unwrap(), None);
}

#[test]
fn round_trip_write_then_read() {
    let dir = TempDir::new().unwrap();
    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config("app").unwrap();

    config.put_string("text", "hello", Scope::User).unwrap();
    config.put_i64("number", -17, Scope::User).unwrap();
    config.put_bool("flag", true, Scope::User).unwrap();
    config
        .put_string_list("list", vec!["x".into(), "y".into()], Scope::User)
        .unwrap();

    assert_eq!(config.get_string("text").unwrap().unwrap(), "hello");
    assert_eq!(config.get_i64("number").unwrap().unwrap(), -17);
    assert!(config.get_bool("flag").unwrap().unwrap());
    assert_eq!(
        config.get_string_list("list").unwrap().unwrap(),
        vec!["x".to_string(), "y".to_string()]
    );
}

#[test]
fn write_to_scope_without_any_location_fails() {
    let dir = TempDir::new().unwrap();
    let factory = factory_with_dirs(vec![format!("USER:{}", dir.path().display())]);
    let config = factory.config("app").unwrap();

    // No CLOUD location exists anywhere in the search list.
    let err = config
        .put_string("k", "v", Scope::Cloud)
        .unwrap_err();
    assert_eq!(err.reason, ErrorReason::NotWriteable);

    let err = config
        .put_value_in(
            "k",
            EntryValue::Text("v".into()),
            ScopeSet::of(&[Scope::Cloud, Scope::Cluster]),
        )
        .unwrap_err();
    assert_eq!(err.reason, ErrorReason::NoWriteableLocation);
}
