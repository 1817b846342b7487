use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use detstream::config::StreamerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETSTREAM_SOURCE",
        "DETSTREAM_MODEL",
        "DETSTREAM_HOST",
        "DETSTREAM_PORT",
        "DETSTREAM_SAVE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "uri": "clips/street.mp4", "width": 1280, "height": 720 },
        "model": "models/yolov8n.onnx?conf=0.4",
        "server": { "host": "127.0.0.1", "port": 8080 },
        "annotate": { "show_fps": false, "jpeg_quality": 70, "fps_alpha": 0.8 },
        "record": { "path": "from_file.avi", "fps": 15 },
        "pipeline": { "channel_capacity": 2 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DETSTREAM_PORT", "9090");
    std::env::set_var("DETSTREAM_SAVE", "from_env.avi");

    let cfg = StreamerConfig::load(Some(file.path())).expect("load config");

    assert_eq!(cfg.source.uri, "clips/street.mp4");
    assert_eq!(cfg.source.width, Some(1280));
    assert_eq!(cfg.source.height, Some(720));
    assert_eq!(cfg.model, "models/yolov8n.onnx?conf=0.4");
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.server.port, 9090);
    assert!(!cfg.annotate.show_fps);
    assert_eq!(cfg.annotate.jpeg_quality, 70);
    assert_eq!(cfg.record.path, Some(PathBuf::from("from_env.avi")));
    assert_eq!(cfg.record.fps, 15);
    assert_eq!(cfg.channel_capacity, 2);
    assert_eq!(cfg.bind_addr(), "127.0.0.1:9090");

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("DETSTREAM_SOURCE", "stub://env");

    let cfg = StreamerConfig::load(None).expect("load defaults");
    assert_eq!(cfg.source.uri, "stub://env");
    assert_eq!(cfg.model, "motion");
    assert_eq!(cfg.server.port, 5000);
    assert_eq!(cfg.channel_capacity, 4);
    assert!(cfg.record.path.is_none());

    clear_env();
}

#[test]
fn rejects_unknown_fields_and_bad_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "sources": { "uri": "0" } }"#)
        .expect("write config");
    assert!(StreamerConfig::load(Some(file.path())).is_err());

    std::env::set_var("DETSTREAM_PORT", "not-a-port");
    assert!(StreamerConfig::load(None).is_err());

    clear_env();
}

#[test]
fn invalid_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "annotate": { "jpeg_quality": 0 } }"#)
        .expect("write config");
    let err = StreamerConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("jpeg_quality"));

    assert!(StreamerConfig::load(Some(std::path::Path::new("/nonexistent/detstream.json"))).is_err());

    clear_env();
}
