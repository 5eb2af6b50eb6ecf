use std::io::Write;

use filedrop::transport::{MemoryTransport, RequestKind};
use filedrop::{initialize, Config, FiledropError, File, ItemStatus};
use serde_json::json;

#[test]
fn file_configuration_drives_the_pond() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
seed = 5

[options]
allow_multiple = true
max_parallel_uploads = 3
instant_upload = false
server = "https://uploads.test/"
"#
    )
    .expect("write config");

    let config = Config::from_file(file.path()).expect("valid config");
    assert_eq!(config.seed, Some(5));
    assert_eq!(config.trace_level, None);

    let net = MemoryTransport::new();
    let mut pond = initialize(&config, Box::new(net.clone())).expect("valid options");
    assert_eq!(pond.option("max_parallel_uploads"), Some(json!(3)));

    pond.add_file(File::new("a.txt", b"abc".to_vec()));
    let id = pond.get_file_at(0).expect("added").id;
    assert_eq!(pond.get_file(&id).map(|file| file.status), Some(ItemStatus::Idle));

    pond.process_file(&id);
    pond.advance(0);
    pond.frame(true);
    assert_eq!(net.ids_of(RequestKind::Process).len(), 1);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = Config::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(FiledropError::Io(_))));
}

#[test]
fn malformed_toml_is_reported() {
    let result = Config::from_toml_str("[options\nallow_multiple = true");
    assert!(matches!(result, Err(FiledropError::Toml(_))));
}

#[test]
fn invalid_options_are_refused_at_startup() {
    let config = Config::from_toml_str("[options]\nmax_parallel_uploads = 0\n").expect("parses");
    let result = initialize(&config, Box::new(MemoryTransport::new()));
    assert!(matches!(result, Err(FiledropError::InvalidOption { .. })));
}

#[test]
fn options_can_change_at_runtime() {
    let config = Config::default();
    let mut pond = initialize(&config, Box::new(MemoryTransport::new())).expect("defaults are valid");

    assert_eq!(pond.set_option("max_files", json!("4")).expect("coerced"), json!(4));
    assert_eq!(pond.option("max_files"), Some(json!(4)));
    assert!(matches!(
        pond.set_option("no_such_option", json!(true)),
        Err(FiledropError::UnknownOption(_))
    ));

    pond.destroy();
    assert!(matches!(pond.set_option("max_files", json!(1)), Err(FiledropError::Destroyed)));
}
