use std::path::Path;
use std::time::Duration;

use deploy_hub::config::{AuthMethod, DeployConfig};
use deploy_hub::error::DeployError;
use deploy_hub::target::{Runtime, StepKind};

const TWO_APPS: &str = r#"
concurrency = 3

[host]
address = "203.0.113.10"
user = "ec2-user"
identity = "~/.ssh/deploy.pem"
auth = "key"

[[targets]]
id = "TaskSchedule"
local_path = "taskschedule"
remote_path = "/home/ec2-user/taskschedule"
port = 5000
health_url = "http://203.0.113.10:5000/"
runtime = "python"
exclude = ["venv/", "*.pyc", "instance/"]
ensure_dirs = ["instance"]

[[targets]]
id = "bingo"
local_path = "/srv/src/bingo"
remote_path = "/home/ec2-user/bingo"
service = "bingo-web"
port = 5003
runtime = "node"
install = ""

[[targets.steps]]
name = "build client"
run = "npm run build"

[[targets.pre_sync]]
run = "npm run build"
cwd = "client"
description = "Building client bundle"
"#;

#[test]
fn test_parse_config() {
    let config = DeployConfig::from_toml(TWO_APPS, Path::new("/work")).unwrap();

    assert_eq!(config.concurrency, 3);
    assert_eq!(config.settle_delay(), Duration::from_secs(2));
    assert_eq!(config.command_timeout(), Duration::from_secs(120));
    assert_eq!(config.host.port, 22); // default
    assert_eq!(config.host.auth, AuthMethod::Key);

    let params = config.connection_params();
    assert_eq!(params.key(), "ec2-user@203.0.113.10:22");
    assert!(!params
        .identity
        .as_ref()
        .unwrap()
        .to_string_lossy()
        .starts_with('~'));
}

#[test]
fn test_descriptors_in_registration_order() {
    let config = DeployConfig::from_toml(TWO_APPS, Path::new("/work")).unwrap();
    let registry = config.registry().unwrap();

    assert_eq!(registry.ids(), vec!["taskschedule", "bingo"]);

    let ts = registry.get("taskschedule").unwrap();
    assert_eq!(ts.local_path, Path::new("/work/taskschedule"));
    assert_eq!(ts.service_name, "taskschedule");
    assert_eq!(ts.runtime, Runtime::Python);
    assert_eq!(ts.health_url.as_deref(), Some("http://203.0.113.10:5000/"));
    // defaults merged with per-target rules
    assert!(ts.exclusions.is_excluded(".git", true));
    assert!(ts.exclusions.is_excluded("venv", true));
    assert!(ts.exclusions.is_excluded("app/models.pyc", false));

    let kinds: Vec<StepKind> = ts.restart_commands.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![StepKind::Install, StepKind::Restart]);
    assert_eq!(
        ts.restart_commands[0].command,
        "cd '/home/ec2-user/taskschedule' && python3 -m pip install -r requirements.txt"
    );
    assert_eq!(
        ts.restart_commands[1].command,
        "sudo systemctl restart 'taskschedule'"
    );
}

#[test]
fn test_empty_install_disables_install_step() {
    let config = DeployConfig::from_toml(TWO_APPS, Path::new("/work")).unwrap();
    let registry = config.registry().unwrap();
    let bingo = registry.get("bingo").unwrap();

    assert_eq!(bingo.local_path, Path::new("/srv/src/bingo"));
    assert_eq!(bingo.service_name, "bingo-web");
    assert!(bingo.health_url.is_none());

    let names: Vec<&str> = bingo.restart_commands.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["build client", "restart service"]);
    assert_eq!(bingo.restart_steps().count(), 1);

    assert_eq!(bingo.pre_sync.len(), 1);
    assert_eq!(bingo.pre_sync[0].cwd, Path::new("/srv/src/bingo/client"));
    assert_eq!(bingo.pre_sync[0].description, "Building client bundle");
}

#[test]
fn test_resolve_all_and_single() {
    let config = DeployConfig::from_toml(TWO_APPS, Path::new("/work")).unwrap();
    let registry = config.registry().unwrap();

    let all: Vec<&str> = registry
        .resolve("all")
        .unwrap()
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(all, vec!["taskschedule", "bingo"]);

    let one = registry.resolve(" BINGO ").unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].id, "bingo");
}

#[test]
fn test_resolve_unknown_lists_available() {
    let config = DeployConfig::from_toml(TWO_APPS, Path::new("/work")).unwrap();
    let registry = config.registry().unwrap();

    match registry.resolve("bngo") {
        Err(DeployError::UnknownTarget { name, available }) => {
            assert_eq!(name, "bngo");
            assert_eq!(available, "taskschedule, bingo");
        }
        other => panic!("expected UnknownTarget, got {other:?}"),
    }
}

#[test]
fn test_duplicate_port_rejected() {
    let toml_str = r#"
[host]
address = "h"
user = "u"

[[targets]]
id = "a"
local_path = "a"
remote_path = "/srv/a"
port = 5000

[[targets]]
id = "b"
local_path = "b"
remote_path = "/srv/b"
port = 5000
"#;
    let config = DeployConfig::from_toml(toml_str, Path::new(".")).unwrap();
    assert!(matches!(config.registry(), Err(DeployError::Config(_))));
}

#[test]
fn test_duplicate_id_rejected_case_insensitively() {
    let toml_str = r#"
[host]
address = "h"
user = "u"

[[targets]]
id = "App"
local_path = "a"
remote_path = "/srv/a"
port = 5000

[[targets]]
id = "app"
local_path = "b"
remote_path = "/srv/b"
port = 5001
"#;
    let config = DeployConfig::from_toml(toml_str, Path::new(".")).unwrap();
    assert!(matches!(config.registry(), Err(DeployError::Config(_))));
}

#[test]
fn test_reserved_id_rejected() {
    let toml_str = r#"
[host]
address = "h"
user = "u"

[[targets]]
id = "all"
local_path = "a"
remote_path = "/srv/a"
port = 5000
"#;
    let config = DeployConfig::from_toml(toml_str, Path::new(".")).unwrap();
    assert!(matches!(config.registry(), Err(DeployError::Config(_))));
}

#[test]
fn test_missing_host_is_an_error() {
    assert!(DeployConfig::from_toml("concurrency = 1\n", Path::new(".")).is_err());
}

#[test]
fn test_load_from_file_resolves_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deploy-hub.toml");
    std::fs::write(&path, TWO_APPS).unwrap();

    let config = DeployConfig::load(Some(&path)).unwrap();
    let registry = config.registry().unwrap();
    assert_eq!(
        registry.get("taskschedule").unwrap().local_path,
        dir.path().join("taskschedule")
    );
}
