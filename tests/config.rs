use jvmti_probe::config::{AgentOptions, ProbeConfig};
use jvmti_probe::error::ProbeError;
use jvmti_probe::hooks::DEFAULT_HOOK_CLASS;
use jvmti_probe::instrument::model::InstrumentKind;
use jvmti_probe::logging::LogFormat;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

const FULL: &str = r#"
log_level: debug
log_format: json
hook_class: com/acme/Hooks
live_variable_control:
  max_object_depth: 3
  max_collection_length: 20
  by_name:
    payload:
      max_object_size: 4096
  by_type:
    java.lang.String:
      maxCollectionLength: 5
scheduler:
  sweep_interval_ms: 250
  retry_interval_ms: 0
emitter:
  workers: 2
events:
  file: /tmp/probe-events.jsonl
instruments:
  - type: LOG
    id: startup-log
    location: { source: com.example.Main, line: 12 }
    logFormat: "started with {}"
    logArguments: [args]
  - type: SPAN
    id: main-span
    location: { source: "com.example.Main.main(java.lang.String[])" }
    operationName: main
"#;

#[test]
fn defaults() {
    let config = ProbeConfig::default();
    assert_eq!(config.log_level, "info");
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.hook_class, DEFAULT_HOOK_CLASS);
    assert_eq!(config.live_variable_control.max_object_depth, 5);
    assert_eq!(config.live_variable_control.max_object_size, 1024 * 1024);
    assert_eq!(config.live_variable_control.max_collection_length, 100);
    assert_eq!(config.scheduler.sweep_interval(), Duration::from_secs(5));
    assert_eq!((config.emitter.workers, config.emitter.capacity), (5, 1024));
    assert!(config.events.file.is_none());
    assert!(config.instruments.is_empty());

    assert_eq!(ProbeConfig::from_yaml_str("", "empty").unwrap(), config);
    assert_eq!(ProbeConfig::from_yaml_str("  \n", "blank").unwrap(), config);
}

#[test]
fn full_yaml() {
    let config = ProbeConfig::from_yaml_str(FULL, "probe.yml").unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.hook_class, "com/acme/Hooks");

    let control = &config.live_variable_control;
    assert_eq!(control.max_object_depth, 3);
    assert_eq!(control.max_collection_length, 20);
    assert_eq!(control.max_object_size, 1024 * 1024);
    assert_eq!(control.by_name["payload"].max_object_size, Some(4096));
    assert_eq!(control.by_type["java.lang.String"].max_collection_length, Some(5));

    assert_eq!(config.scheduler.sweep_interval(), Duration::from_millis(250));
    assert_eq!(config.scheduler.retry_interval(), Duration::from_millis(1));
    assert_eq!((config.emitter.workers, config.emitter.capacity), (2, 1024));
    assert_eq!(config.events.file, Some(PathBuf::from("/tmp/probe-events.jsonl")));

    assert_eq!(config.instruments.len(), 2);
    let log = &config.instruments[0];
    assert_eq!(log.id, "startup-log");
    assert_eq!(log.location.line, Some(12));
    assert!(matches!(&log.kind, InstrumentKind::Log { log_arguments, .. } if log_arguments == &["args"]));
    let span = &config.instruments[1];
    assert!(span.is_span());
    assert_eq!(span.target_class(), "com.example.Main");
}

#[test]
fn yaml_errors_name_their_origin() {
    let err = ProbeConfig::from_yaml_str("log_format: xml", "probe.yml").unwrap_err();
    assert!(matches!(&err, ProbeError::Yaml(origin, _) if origin == "probe.yml"));
    assert!(err.to_string().starts_with("error parsing probe.yml"));

    let err = ProbeConfig::load("/nonexistent/probe.yml").unwrap_err();
    assert!(matches!(err, ProbeError::Io(path, _) if path == "/nonexistent/probe.yml"));
}

#[test]
fn agent_options() {
    assert_eq!(AgentOptions::parse("").unwrap(), AgentOptions::default());
    let options = AgentOptions::parse(" config=/etc/probe.yml, log=trace,,events=/tmp/e.jsonl ").unwrap();
    assert_eq!(options.config, Some(PathBuf::from("/etc/probe.yml")));
    assert_eq!(options.log.as_deref(), Some("trace"));
    assert_eq!(options.events, Some(PathBuf::from("/tmp/e.jsonl")));

    for bad in ["verbose", "log=", "port=8080"] {
        match AgentOptions::parse(bad) {
            Err(ProbeError::InvalidOption(pair)) => assert_eq!(pair, bad),
            other => panic!("{bad}: expected an invalid option, got {other:?}"),
        }
    }
}

#[test]
fn options_override_the_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "log_level: warn\nemitter:\n  capacity: 16").unwrap();
    let path = file.path().display().to_string();

    let config = ProbeConfig::from_agent_options(&format!("config={path}")).unwrap();
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.emitter.capacity, 16);
    assert!(config.events.file.is_none());

    let config = ProbeConfig::from_agent_options(&format!("log=debug,config={path},events=/tmp/out.jsonl")).unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.emitter.capacity, 16);
    assert_eq!(config.events.file, Some(PathBuf::from("/tmp/out.jsonl")));

    let config = ProbeConfig::from_agent_options("log=error").unwrap();
    assert_eq!(config.log_level, "error");
    assert_eq!(config.hook_class, DEFAULT_HOOK_CLASS);
}
