//! Validation tests: pipeline definitions are rejected before anything runs

use conveyor::core::DefinitionError;
use conveyor::PipelineConfig;

fn parse_err(yaml: &str) -> String {
    PipelineConfig::from_yaml(yaml).unwrap_err().to_string()
}

#[test]
fn test_cycle_is_rejected_with_path() {
    let err = parse_err(
        r#"
name: "Cyclic"
stages:
  - name: a
    depends_on: [c]
    steps: [{ name: s, run: "true" }]
  - name: b
    depends_on: [a]
    steps: [{ name: s, run: "true" }]
  - name: c
    depends_on: [b]
    steps: [{ name: s, run: "true" }]
"#,
    );
    assert!(err.contains("cycle"), "unexpected error: {err}");
    assert!(err.contains("->"), "cycle path missing: {err}");
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let err = parse_err(
        r#"
name: "Orphan"
stages:
  - name: test
    depends_on: [compile]
    steps: [{ name: s, run: "true" }]
"#,
    );
    assert!(err.contains("compile"), "unexpected error: {err}");
}

#[test]
fn test_duplicate_stage_name_is_rejected() {
    let err = parse_err(
        r#"
name: "Dup"
stages:
  - name: build
    steps: [{ name: s, run: "true" }]
  - name: build
    steps: [{ name: s, run: "true" }]
"#,
    );
    assert!(err.contains("build"), "unexpected error: {err}");
}

#[test]
fn test_input_must_name_a_dependency() {
    let err = parse_err(
        r#"
name: "Wiring"
stages:
  - name: build
    outputs: [{ name: bundle, path: "out" }]
    steps: [{ name: s, run: "true" }]
  - name: deploy
    inputs: [{ from: build, name: bundle }]
    steps: [{ name: s, run: "true" }]
"#,
    );
    // deploy consumes from build without depending on it
    assert!(err.contains("deploy"), "unexpected error: {err}");
}

#[test]
fn test_input_must_match_a_declared_output() {
    let err = parse_err(
        r#"
name: "Wiring"
stages:
  - name: build
    steps: [{ name: s, run: "true" }]
  - name: deploy
    depends_on: [build]
    inputs: [{ from: build, name: bundle }]
    steps: [{ name: s, run: "true" }]
"#,
    );
    assert!(err.contains("bundle"), "unexpected error: {err}");
}

#[test]
fn test_unknown_environment_is_rejected_at_resolve() {
    let yaml = r#"
name: "Envs"
params:
  registry: "dev.example.com"
environments:
  staging:
    params:
      registry: "staging.example.com"
stages:
  - name: push
    steps: [{ name: s, run: "true" }]
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();

    let resolved = config.resolve(Some("staging")).unwrap();
    assert_eq!(resolved.params.get("registry").unwrap(), "staging.example.com");

    let err = config.resolve(Some("prod")).unwrap_err();
    assert_eq!(err, DefinitionError::UnknownEnvironment("prod".to_string()));
}

#[test]
fn test_valid_definition_parses() {
    let yaml = r#"
name: "Release"
params:
  version: "1.0.0"
concurrency: 2
max_attempts: 2
default_timeout_secs: 120
stages:
  - name: compile
    outputs: [{ name: binary, path: "target/app" }]
    steps:
      - { name: build, run: "make build" }
  - name: test
    depends_on: [compile]
    steps:
      - { name: unit, run: "make test", timeout_secs: 600 }
  - name: publish
    depends_on: [test, compile]
    inputs: [{ from: compile, name: binary }]
    steps:
      - { name: push, run: "make push", secrets: [REGISTRY_TOKEN] }
  - name: teardown
    depends_on: [publish]
    continue_on_failure: true
    steps:
      - { name: cleanup, run: "make clean", shell: bash }
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.stages.len(), 4);
    assert_eq!(config.concurrency, Some(2));

    let defaults = config.defaults();
    assert_eq!(defaults.max_attempts, 2);
    assert_eq!(defaults.step.timeout_secs, 120);
}
