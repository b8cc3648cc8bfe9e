use reconq::error::Error;
use reconq::model::Params;
use reconq::params::{builtins, load_params_file, merge_params, parse_kv, parse_kv_list};
use std::path::PathBuf;

/// Write `content` to a unique file under the system temp dir.
fn temp_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reconq-params-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn kv_splits_on_first_equals() {
    assert_eq!(
        parse_kv("threads=10").unwrap(),
        ("threads".to_string(), "10".to_string())
    );
    assert_eq!(
        parse_kv("header=X-Auth=abc").unwrap(),
        ("header".to_string(), "X-Auth=abc".to_string())
    );
    assert_eq!(
        parse_kv("empty=").unwrap(),
        ("empty".to_string(), String::new())
    );
}

#[test]
fn kv_rejects_malformed_input() {
    assert!(matches!(parse_kv("novalue"), Err(Error::Config(_))));
    assert!(matches!(parse_kv("=value"), Err(Error::Config(_))));
    assert!(matches!(parse_kv("  =value"), Err(Error::Config(_))));
}

#[test]
fn kv_list_later_duplicates_win() {
    let params = parse_kv_list(&["a=1", "b=2", "a=3"]).unwrap();
    assert_eq!(params.get("a").map(String::as_str), Some("3"));
    assert_eq!(params.get("b").map(String::as_str), Some("2"));
    assert_eq!(params.len(), 2);
}

#[test]
fn params_file_json() {
    let path = temp_file(
        "params.json",
        r#"{"threads": 20, "deep": true, "wordlist": "small.txt", "skip": null}"#,
    );
    let params = load_params_file(&path).unwrap();
    assert_eq!(params["threads"], "20");
    assert_eq!(params["deep"], "true");
    assert_eq!(params["wordlist"], "small.txt");
    assert_eq!(params["skip"], "");
}

#[test]
fn params_file_toml() {
    let path = temp_file("params.toml", "threads = 5\nmode = \"fast\"\n");
    let params = load_params_file(&path).unwrap();
    assert_eq!(params["threads"], "5");
    assert_eq!(params["mode"], "fast");
}

#[test]
fn params_file_rejects_nested_values() {
    let path = temp_file("params.json", r#"{"ports": [80, 443]}"#);
    assert!(matches!(load_params_file(&path), Err(Error::Config(_))));

    let path = temp_file("params.json", r#"["not", "a", "table"]"#);
    assert!(matches!(load_params_file(&path), Err(Error::Config(_))));
}

#[test]
fn params_file_missing_is_io_error() {
    let path = std::env::temp_dir().join("reconq-does-not-exist.toml");
    assert!(matches!(load_params_file(&path), Err(Error::Io(_))));
}

#[test]
fn builtins_win_over_file_and_flags() {
    let mut file = Params::new();
    file.insert("target".into(), "evil.example".into());
    file.insert("threads".into(), "1".into());
    file.insert("mode".into(), "slow".into());

    let mut cli = Params::new();
    cli.insert("threads".into(), "8".into());

    let merged = merge_params(
        &file,
        &cli,
        &builtins("example.com", None, "example.com"),
    );
    assert_eq!(merged["target"], "example.com");
    assert_eq!(merged["workspace"], "example.com");
    assert_eq!(merged["threads"], "8");
    assert_eq!(merged["mode"], "slow");
    assert!(!merged.contains_key("target_file"));
}

#[test]
fn builtins_include_target_file_for_file_input() {
    let params = builtins("/tmp/hosts.txt", Some("/tmp/hosts.txt"), "tmp_hosts.txt");
    assert_eq!(params["target_file"], "/tmp/hosts.txt");
}
