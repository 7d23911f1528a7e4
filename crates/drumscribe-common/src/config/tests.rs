//! Configuration tests

use super::*;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 4] =
    ["DRUMSCRIBE_SEED", "DRUMSCRIBE_SMOKE", "DRUMSCRIBE_SMOKE_INPUT", "DRUMSCRIBE_EXCLUDE"];

fn clear_env() {
    for var in &ENV_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
fn test_default_config() {
    let config = MigrationConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.init.seed, 42);
    assert!(config.smoke.enabled);
    assert!(config.smoke.input_shape.is_none());
    assert!(config.output.write_sidecar);
    assert!(config.matching.kernel_tokens.contains(&"weights".to_string()));
    assert!(config.matching.exclude.iter().any(|p| p == "/adam"));
}

#[test]
fn test_toml_config_loading() {
    let toml_content = r#"
[matching]
conv_tokens = ["conv", "cnn"]
bias_tokens = ["bias", "b"]

[init]
seed = 7

[smoke]
enabled = false
input_shape = [1, 20, 32, 1]
"#;

    let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
    temp_file.write_all(toml_content.as_bytes()).unwrap();

    let config = MigrationConfig::from_file(temp_file.path()).unwrap();
    assert_eq!(config.matching.conv_tokens, vec!["conv", "cnn"]);
    assert_eq!(config.matching.bias_tokens, vec!["bias", "b"]);
    // Unspecified fields keep their defaults
    assert_eq!(config.matching.kernel_tokens, MatchRules::default().kernel_tokens);
    assert_eq!(config.init.seed, 7);
    assert!(!config.smoke.enabled);
    assert_eq!(config.smoke.input_shape, Some(vec![1, 20, 32, 1]));
}

#[test]
fn test_json_config_loading() {
    let json_content = r#"{ "init": { "seed": 1234 }, "output": { "write_sidecar": false } }"#;

    let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
    temp_file.write_all(json_content.as_bytes()).unwrap();

    let config = MigrationConfig::from_file(temp_file.path()).unwrap();
    assert_eq!(config.init.seed, 1234);
    assert!(!config.output.write_sidecar);
    assert!(config.smoke.enabled);
}

#[test]
fn test_unsupported_extension() {
    let temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
    let err = MigrationConfig::from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, DrumscribeError::Config(_)));
}

#[test]
fn test_config_validation() {
    let mut config = MigrationConfig::default();
    config.matching.kernel_tokens.clear();
    assert!(config.validate().is_err());

    let mut config = MigrationConfig::default();
    config.matching.dense_tokens.push("  ".to_string());
    assert!(config.validate().is_err());

    let mut config = MigrationConfig::default();
    config.smoke.input_shape = Some(vec![1, 100, 229]);
    assert!(config.validate().is_err());

    config.smoke.input_shape = Some(vec![1, 0, 229, 1]);
    assert!(config.validate().is_err());
}

#[test]
fn test_parse_shape() {
    assert_eq!(parse_shape("1x100x229x1").unwrap(), vec![1, 100, 229, 1]);
    assert_eq!(parse_shape("1, 8, 16, 1").unwrap(), vec![1, 8, 16, 1]);
    assert!(parse_shape("1x100").is_err());
    assert!(parse_shape("axbxcxd").is_err());
}

#[test]
fn test_config_merging() {
    let mut base = MigrationConfig::default();
    base.smoke.input_shape = Some(vec![1, 10, 10, 1]);

    let mut other = MigrationConfig::default();
    other.init.seed = 99;
    other.smoke.enabled = false;

    base.merge_with(other);

    assert_eq!(base.init.seed, 99); // Overridden
    assert!(!base.smoke.enabled); // Overridden
    assert_eq!(base.smoke.input_shape, Some(vec![1, 10, 10, 1])); // Preserved
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    unsafe {
        env::set_var("DRUMSCRIBE_SEED", "31337");
        env::set_var("DRUMSCRIBE_SMOKE", "off");
        env::set_var("DRUMSCRIBE_SMOKE_INPUT", "1x16x32x1");
        env::set_var("DRUMSCRIBE_EXCLUDE", "/Lamb, moving_mean");
    }

    let config = MigrationConfig::from_env().unwrap();
    assert_eq!(config.init.seed, 31337);
    assert!(!config.smoke.enabled);
    assert_eq!(config.smoke.input_shape, Some(vec![1, 16, 32, 1]));
    assert!(config.matching.exclude.contains(&"/lamb".to_string()));
    assert!(config.matching.exclude.contains(&"moving_mean".to_string()));

    clear_env();
}

#[test]
#[serial]
fn test_invalid_env_value() {
    clear_env();
    unsafe {
        env::set_var("DRUMSCRIBE_SEED", "not-a-number");
    }

    assert!(MigrationConfig::from_env().is_err());

    clear_env();
}

#[test]
#[serial]
fn test_config_loader_precedence() {
    clear_env();

    let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
    temp_file.write_all(b"[init]\nseed = 5\n[smoke]\nenabled = false\n").unwrap();

    unsafe {
        env::set_var("DRUMSCRIBE_SEED", "6");
    }

    let config = ConfigLoader::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.init.seed, 6); // env beats file
    assert!(!config.smoke.enabled); // file beats default

    clear_env();

    let config = ConfigLoader::load(None).unwrap();
    assert_eq!(config, MigrationConfig::default());
}
