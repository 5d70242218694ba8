//! Lifecycle behavior: close semantics, reload, cache rebuild, sessions.

use confstack::settings::ConfigFeature;
use confstack::{ConfigFactory, ConfigFactoryBuilder, ErrorReason, Scope, ScopeSet};
use tempfile::TempDir;

fn factory_for(dir: &TempDir, app_name: &str) -> ConfigFactory {
    ConfigFactoryBuilder::new("Acme", app_name)
        .unwrap()
        .set_bool(ConfigFeature::PermitTestMode, true)
        .unwrap()
        .set_bool(ConfigFeature::TestMode, true)
        .unwrap()
        .set_text_list(
            ConfigFeature::TestmodeDirectories,
            vec![format!("USER:{}", dir.path().display())],
        )
        .unwrap()
        .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
        .unwrap()
        .set_bool(ConfigFeature::ExceptionOnMissingEntry, false)
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn every_operation_fails_after_close() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.properties"), "k=v\n").unwrap();
    let factory = factory_for(&dir, "Widget");
    let config = factory.config("app").unwrap();
    config.close();

    assert_eq!(
        config.get_string("k").unwrap_err().reason,
        ErrorReason::FactoryClosed
    );
    assert_eq!(
        config.put_string("k", "x", Scope::User).unwrap_err().reason,
        ErrorReason::FactoryClosed
    );
    assert_eq!(config.flush().unwrap_err().reason, ErrorReason::FactoryClosed);
    assert_eq!(config.reload().unwrap_err().reason, ErrorReason::FactoryClosed);
    assert_eq!(
        config.all_keys().unwrap_err().reason,
        ErrorReason::FactoryClosed
    );
    assert_eq!(
        config.is_empty().unwrap_err().reason,
        ErrorReason::FactoryClosed
    );

    // Cursor operations on a closed configuration fail as well.
    let mut cursor = config.cursor();
    assert_eq!(cursor.enter().unwrap_err().reason, ErrorReason::FactoryClosed);
}

#[test]
fn close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.properties"), "k=v\n").unwrap();
    let factory = factory_for(&dir, "Widget");
    let config = factory.config("app").unwrap();
    config.close();
    config.close();
    assert!(config.is_closed());
}

#[test]
fn reload_picks_up_external_edits_and_drops_runtime_state() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.properties");
    std::fs::write(&file, "k=before\n").unwrap();

    let factory = factory_for(&dir, "Widget");
    let config = factory.config("app").unwrap();
    config.put_string("volatile", "ram-only", Scope::Runtime).unwrap();
    assert_eq!(config.get_string("k").unwrap().unwrap(), "before");

    std::fs::write(&file, "k=after\n").unwrap();
    config.reload().unwrap();

    assert_eq!(config.get_string("k").unwrap().unwrap(), "after");
    // The runtime layer was rebuilt empty.
    assert_eq!(config.get_string("volatile").unwrap(), None);
}

#[test]
fn session_scope_reads_environment_variables() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.properties"), "origin=file\n").unwrap();
    // Unique application name so the prefix cannot collide across tests.
    unsafe {
        std::env::set_var("ENVPROBE_ORIGIN", "session");
        std::env::set_var("ENVPROBE_NET__PORT", "4711");
    }

    let factory = factory_for(&dir, "EnvProbe");
    let config = factory.config("app").unwrap();

    // SESSION beats USER for the same key.
    assert_eq!(config.get_string("origin").unwrap().unwrap(), "session");
    assert_eq!(config.get_i64("net/port").unwrap().unwrap(), 4711);

    // Restricting to USER shows the file value again.
    assert_eq!(
        config
            .entry_in("origin", ScopeSet::only(Scope::User))
            .unwrap()
            .unwrap()
            .as_string()
            .unwrap(),
        "file"
    );

    unsafe {
        std::env::remove_var("ENVPROBE_ORIGIN");
        std::env::remove_var("ENVPROBE_NET__PORT");
    }
}

#[test]
fn blob_side_channel_round_trip() {
    let dir = TempDir::new().unwrap();
    let factory = factory_for(&dir, "Widget");

    let blob = factory.blob_config("license.key").unwrap();
    assert!(blob.get(ScopeSet::all()).is_none());

    blob.put(Scope::User, b"BLOB BODY").unwrap();
    let (scope, bytes) = blob.get(ScopeSet::all()).unwrap();
    assert_eq!(scope, Scope::User);
    assert_eq!(bytes, b"BLOB BODY");

    // A fresh handle sees the persisted body.
    let reopened = factory.blob_config("license.key").unwrap();
    assert_eq!(reopened.get_at(Scope::User).unwrap(), b"BLOB BODY");
}

#[test]
fn scheme_registered_on_factory_applies_on_lookup() {
    use confstack::scheme::{ConfigScheme, EntrySpec, Validator};
    use confstack::{EntryType, EntryValue};

    let dir = TempDir::new().unwrap();
    let factory = factory_for(&dir, "Widget");
    let scheme = ConfigScheme::builder()
        .entry(
            EntrySpec::new("port", EntryType::Number)
                .with_validator(Validator::Port)
                .with_default(EntryValue::Integer(8080)),
        )
        .build();
    factory.register_scheme("app", scheme).unwrap();

    let config = factory.config("app").unwrap();
    // The scheme default answers when no source holds the key.
    assert_eq!(config.get_i64("port").unwrap().unwrap(), 8080);
    // The validator guards writes.
    let err = config.put_i64("port", 99999, Scope::User).unwrap_err();
    assert_eq!(err.reason, ErrorReason::InputInvalid);
}

#[test]
fn cursor_walks_factory_built_configuration() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("app.yaml"),
        "server:\n  host: localhost\n  port: 8080\ntitle: demo\n",
    )
    .unwrap();

    let factory = factory_for(&dir, "Widget");
    let config = factory.config("app").unwrap();
    let mut cursor = config.cursor();

    assert!(cursor.enter().unwrap());
    assert!(cursor.move_to("server").unwrap());
    assert!(cursor.can_enter().unwrap());
    assert!(cursor.enter().unwrap());

    let mut children = Vec::new();
    while cursor.move_next() {
        children.push(cursor.current_element().unwrap().unwrap().key().to_string());
    }
    assert_eq!(children, vec!["host", "port"]);

    assert!(cursor.leave().unwrap());
    assert_eq!(
        cursor.current_element().unwrap().unwrap().key(),
        "server"
    );
}
