use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camfeed::config::DaemonConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const TWO_PIPELINES: &str = r#"
pipelines:
  - name: north-gate
    source:
      uri: rtsp://10.0.0.5:554/stream1
      protocol: synthetic
    processing:
      uri: http://localhost:9000
      protocol: http
      steps:
        - type: motion_detection
          model: frame-diff
    output:
      uri: http://localhost:8080/north/feed
      protocol: rss
      format: xml
  - name: south-gate
    source:
      uri: rtsp://10.0.0.6:554/stream1
      protocol: synthetic
    processing:
      uri: http://localhost:9000
      protocol: http
      steps:
        - type: motion_detection
          model: frame-diff
    output:
      uri: http://localhost:8080/south/feed
      protocol: rss
      format: xml
      params:
        images_dir: south-images
"#;

fn clear_env() {
    for key in [
        "CAMFEED_CONFIG",
        "CAMFEED_PIPELINE",
        "CAMFEED_BIND_ADDR",
        "CAMFEED_IMAGES_DIR",
        "CAMFEED_FRAME_PERIOD_MS",
        "CAMFEED_RETRY_DELAY_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DaemonConfig::load().expect("load defaults");
    assert_eq!(cfg.pipeline_path, PathBuf::from("pipelines.yaml"));
    assert_eq!(cfg.pipeline, None);
    assert_eq!(cfg.bind_addr, None);
    assert_eq!(cfg.frame_period, Duration::from_secs(1) / 30);
    assert_eq!(cfg.retry_delay, Duration::from_secs(1));
}

#[test]
fn env_overrides_and_pipeline_selection() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp document");
    std::io::Write::write_all(&mut file, TWO_PIPELINES.as_bytes()).expect("write document");

    std::env::set_var("CAMFEED_CONFIG", file.path());
    std::env::set_var("CAMFEED_PIPELINE", "south-gate");
    std::env::set_var("CAMFEED_BIND_ADDR", "0.0.0.0:9090");
    std::env::set_var("CAMFEED_FRAME_PERIOD_MS", "100");
    std::env::set_var("CAMFEED_RETRY_DELAY_MS", "250");

    let cfg = DaemonConfig::load().expect("load config");
    assert_eq!(cfg.pipeline_path, file.path());
    assert_eq!(cfg.frame_period, Duration::from_millis(100));
    assert_eq!(cfg.executor_options().retry_delay, Duration::from_millis(250));

    let pipelines = camfeed::load_file(&cfg.pipeline_path).expect("document");
    let def = cfg.select(pipelines).expect("south-gate selected");
    assert_eq!(def.name, "south-gate");

    let feed = cfg.feed_settings(&def).expect("feed settings");
    assert_eq!(feed.bind_addr, "0.0.0.0:9090");
    assert_eq!(feed.feed_path, "/south/feed");
    assert_eq!(feed.images_dir, PathBuf::from("south-images"));

    clear_env();
}

#[test]
fn ambiguous_or_missing_pipeline_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DaemonConfig::load().expect("load defaults");
    let pipelines = camfeed::load(TWO_PIPELINES).expect("document");
    let err = cfg.select(pipelines.clone()).unwrap_err();
    assert!(err.to_string().contains("north-gate, south-gate"));

    let named = DaemonConfig {
        pipeline: Some("east-gate".to_string()),
        ..cfg
    };
    assert!(named.select(pipelines).is_err());
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMFEED_FRAME_PERIOD_MS", "fast");
    assert!(DaemonConfig::load().is_err());
    clear_env();

    std::env::set_var("CAMFEED_RETRY_DELAY_MS", "0");
    assert!(DaemonConfig::load().is_err());
    clear_env();

    std::env::set_var("CAMFEED_BIND_ADDR", "localhost");
    assert!(DaemonConfig::load().is_err());
    clear_env();
}
