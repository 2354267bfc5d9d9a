//! Unit tests for configuration loading and validation
//!
//! These tests verify config parsing, validation, and settings resolution.

use panel_snapshots::config::{load_config, resolve_settings, ConfigError};
use std::time::Duration;
use test_utils::{
    full_config_toml, minimal_config_toml, render_config, ConfigBuilder, DatabaseEngine,
    ResourceKind, ResultAssertions, TestContext,
};

fn write_template(ctx: &TestContext, template: &str) -> std::path::PathBuf {
    let www = ctx.create_subdir("www");
    let content = render_config(
        template,
        &ctx.temp_dir().join("backups"),
        &www,
        &ctx.temp_dir().join("logs"),
    );
    ctx.create_file("config.toml", &content)
}

#[test]
fn test_config_loading_valid() {
    let (path, _config, _temp_dir) = ConfigBuilder::minimal().with_max_snapshots(3).write();

    let loaded = load_config(&path).assert_ok_msg("Config should load successfully");
    assert_eq!(loaded.global.max_snapshots, 3);
    assert!(loaded.locations.contains_key("virtualHost"));
}

#[test]
fn test_minimal_template_uses_defaults() {
    let ctx = TestContext::new();
    let path = write_template(&ctx, minimal_config_toml());

    let config = load_config(&path).assert_ok();
    let settings = resolve_settings(&config).assert_ok();

    assert_eq!(settings.backup_root, ctx.temp_dir().join("backups"));
    assert_eq!(settings.catalog_file, ctx.temp_dir().join("backups").join("catalog.json"));
    assert_eq!(settings.retention.max_for(ResourceKind::Database), 5);
    assert_eq!(settings.operation_timeout, Some(Duration::from_secs(3600)));
    assert_eq!(
        settings.reload_services.get(&ResourceKind::VirtualHost).map(String::as_str),
        Some("nginx")
    );
    assert!(config.notifications.discord_webhook_url.is_empty());
}

#[test]
fn test_full_template_resolves_overrides() {
    let ctx = TestContext::new();
    let path = write_template(&ctx, full_config_toml());

    let config = load_config(&path).assert_ok();
    let settings = resolve_settings(&config).assert_ok();

    assert_eq!(settings.retention.max_for(ResourceKind::Database), 10);
    assert_eq!(settings.retention.max_for(ResourceKind::LogSet), 2);
    assert_eq!(settings.retention.max_for(ResourceKind::VirtualHost), 5);
    assert_eq!(settings.operation_timeout, None);

    // Configured hook replaces the default, an empty name removes it
    assert_eq!(
        settings.reload_services.get(&ResourceKind::VirtualHost).map(String::as_str),
        Some("apache2")
    );
    assert!(!settings.reload_services.contains_key(&ResourceKind::DnsZone));

    let database = settings.database.expect("database section");
    assert_eq!(database.engine, DatabaseEngine::Postgres);
    assert_eq!(database.host, "db.internal");
    assert!(settings.full_system.is_some());
    assert_eq!(config.notifications.rate_limit_minutes, 30);
}

#[test]
fn test_relative_backup_root_rejected() {
    let ctx = TestContext::new();
    let path = ctx.create_file(
        "config.toml",
        r#"
[global]
backup_root = "backups"
"#,
    );

    match load_config(&path) {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("backup_root")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_zero_retention_rejected() {
    let (config, _temp_dir) = ConfigBuilder::minimal()
        .with_retention(ResourceKind::DnsZone, 0)
        .persist();
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", &toml::to_string_pretty(&config).unwrap());

    load_config(&path).assert_err_contains("dnsZone");
}

#[test]
fn test_unknown_kind_rejected() {
    let ctx = TestContext::new();
    let path = ctx.create_file(
        "config.toml",
        r#"
[global]
backup_root = "/var/backups/panel"

[retention]
mailbox = 3
"#,
    );

    match load_config(&path) {
        Err(ConfigError::UnknownResourceKind { section, key }) => {
            assert_eq!(section, "retention");
            assert_eq!(key, "mailbox");
        }
        other => panic!("expected unknown kind error, got {:?}", other),
    }
}

#[test]
fn test_relative_location_rejected() {
    let ctx = TestContext::new();
    let path = ctx.create_file(
        "config.toml",
        r#"
[global]
backup_root = "/var/backups/panel"

[locations]
virtualHost = "www/{ref}"
"#,
    );

    load_config(&path).assert_err_contains("virtualHost");
}

#[test]
fn test_invalid_toml() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "[global\nbackup_root = ");

    assert!(matches!(load_config(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_missing_file() {
    let ctx = TestContext::new();
    assert!(matches!(
        load_config(ctx.temp_dir().join("absent.toml")),
        Err(ConfigError::ReadError(_))
    ));
}
