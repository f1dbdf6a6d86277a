//! End-to-end pipeline execution over the built-in steps.

mod common;

use common::EventRecorder;
use serde_json::json;
use stagecraft_core::config::PipelineConfig;
use stagecraft_engine::build_from_config;
use stagecraft_steps::builtin_registry;
use std::time::Duration;

fn build(yaml: &str) -> (stagecraft_engine::Pipeline, std::sync::Arc<EventRecorder>) {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let pipeline = build_from_config(&config, &builtin_registry()).unwrap();
    let recorder = EventRecorder::new();
    pipeline.add_listener(recorder.clone());
    (pipeline, recorder)
}

#[tokio::test]
async fn chained_js_transform() {
    let (pipeline, recorder) = build(
        r#"
name: chain
stages:
  - id: src
    step_type: json
    step_config:
      data: '{"value": 10}'
  - id: dbl
    step_type: js
    step_config:
      code: "return ctx.src.value * 2"
    dependencies: [src]
"#,
    );

    pipeline.execute().await.unwrap();

    let outputs = recorder.outputs_of("dbl");
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["default"], json!(20));

    // One stage.completed per stage.
    assert_eq!(recorder.completed_count("src"), 1);
    assert_eq!(recorder.completed_count("dbl"), 1);
    assert_eq!(recorder.started_mode().as_deref(), Some("batch"));
}

#[tokio::test]
async fn conditional_routing() {
    let (pipeline, recorder) = build(
        r#"
name: routing
stages:
  - id: user
    step_type: json
    step_config:
      data: '{"is_premium": true}'
  - id: chk
    step_type: if
    step_config:
      condition: "$js: ctx.user.is_premium"
    dependencies: [user]
  - id: premium_flow
    step_type: js
    step_config:
      code: "return 'premium'"
    dependencies: ["chk:true"]
  - id: free_flow
    step_type: js
    step_config:
      code: "return 'free'"
    dependencies: ["chk:false"]
"#,
    );

    pipeline.execute().await.unwrap();

    assert_eq!(recorder.outputs_of("premium_flow").len(), 1);
    assert_eq!(recorder.outputs_of("free_flow").len(), 0);

    // Both downstream workers still complete cleanly.
    assert_eq!(recorder.completed_count("premium_flow"), 1);
    assert_eq!(recorder.completed_count("free_flow"), 1);
}

#[tokio::test]
async fn event_id_propagates_through_a_chain() {
    let (pipeline, recorder) = build(
        r#"
name: correlation
stages:
  - id: a
    step_type: json
    step_config:
      data: '{"n": 1}'
  - id: b
    step_type: js
    step_config:
      code: "return ctx.a.n + 1"
    dependencies: [a]
  - id: c
    step_type: js
    step_config:
      code: "return ctx.b + 1"
    dependencies: [b]
"#,
    );

    pipeline.execute().await.unwrap();

    let last = recorder.outputs_of("c");
    assert_eq!(last.len(), 1);
    assert_eq!(last[0]["default"], json!(3));

    // The id minted at the entry point arrives unchanged at every stage.
    let ids: Vec<String> = recorder
        .events()
        .into_iter()
        .filter(|e| e.kind == stagecraft_core::EventKind::StageOutput)
        .map(|e| e.data["event_id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| !id.is_empty()));
    assert!(ids.iter().all(|id| id == &ids[0]), "ids diverged: {ids:?}");
}

#[tokio::test]
async fn cycle_is_rejected_before_execution() {
    let config = PipelineConfig::from_yaml(
        r#"
name: cyclic
stages:
  - id: a
    step_type: js
    step_config:
      code: "return 1"
    dependencies: [c]
  - id: b
    step_type: js
    step_config:
      code: "return 1"
    dependencies: [a]
  - id: c
    step_type: js
    step_config:
      code: "return 1"
    dependencies: [b]
"#,
    )
    .unwrap();

    let pipeline = build_from_config(&config, &builtin_registry()).unwrap();
    let err = pipeline.validate().unwrap_err();
    assert!(err.to_string().contains("circular dependency"));

    let err = pipeline.start().unwrap_err();
    assert!(err.to_string().contains("circular dependency"));
    assert!(!pipeline.is_running());
}

#[tokio::test]
async fn globals_are_visible_to_expressions() {
    std::env::set_var("STAGECRAFT_E2E_TOKEN", "tok-1");
    let (pipeline, recorder) = build(
        r#"
name: globals
variables:
  region: eu-central-1
secrets:
  token: "$env: STAGECRAFT_E2E_TOKEN"
stages:
  - id: report
    step_type: js
    step_config:
      code: "return $vars.region + '/' + $secrets.token"
"#,
    );

    pipeline.execute().await.unwrap();

    let outputs = recorder.outputs_of("report");
    assert_eq!(outputs[0]["default"], json!("eu-central-1/tok-1"));
}

#[tokio::test]
async fn fan_out_and_fan_in() {
    let (pipeline, recorder) = build(
        r#"
name: diamond
stages:
  - id: src
    step_type: json
    step_config:
      data: '{"n": 5}'
  - id: left
    step_type: js
    step_config:
      code: "return ctx.src.n + 1"
    dependencies: [src]
  - id: right
    step_type: js
    step_config:
      code: "return ctx.src.n * 2"
    dependencies: [src]
  - id: join
    step_type: js
    step_config:
      code: "return ctx.left + ctx.right"
    dependencies: [left, right]
"#,
    );

    pipeline.execute().await.unwrap();

    let outputs = recorder.outputs_of("join");
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["default"], json!(16));
}

#[tokio::test]
async fn per_event_error_does_not_abort_siblings() {
    let (pipeline, recorder) = build(
        r#"
name: resilient
stages:
  - id: src
    step_type: json
    step_config:
      data: '{"n": 1}'
  - id: broken
    step_type: json
    step_config:
      data: "{definitely not json"
    dependencies: [src]
  - id: healthy
    step_type: js
    step_config:
      code: "return ctx.src.n"
    dependencies: [src]
"#,
    );

    pipeline.execute().await.unwrap();

    let errors = recorder.errors_of("broken");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("parse JSON"));

    assert_eq!(recorder.outputs_of("healthy").len(), 1);
    assert_eq!(recorder.completed_count("broken"), 1);
}

#[tokio::test]
async fn streaming_pipeline_ticks_until_stopped() {
    let (pipeline, recorder) = build(
        r#"
name: ticker
stages:
  - id: clock
    step_type: cron
    step_config:
      schedule: "@every 40ms"
  - id: stamp
    step_type: js
    step_config:
      code: "return ctx._execution.id"
    dependencies: [clock]
"#,
    );

    pipeline.start().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    pipeline.stop().await.unwrap();

    assert_eq!(recorder.started_mode().as_deref(), Some("streaming"));

    let stamped = recorder.outputs_of("stamp");
    assert!(!stamped.is_empty(), "expected at least one tick");

    // Every tick carries a distinct correlation id.
    let mut ids: Vec<String> = stamped
        .iter()
        .map(|o| o["default"].as_str().unwrap_or_default().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), stamped.len());
}

#[tokio::test]
async fn foreach_feeds_downstream_aggregate() {
    let (pipeline, recorder) = build(
        r#"
name: iterate
stages:
  - id: src
    step_type: json
    step_config:
      data: '{"items": ["a", "b", "c"]}'
  - id: spread
    step_type: foreach
    step_config:
      list: "$js: ctx.src.items"
    dependencies: [src]
  - id: first
    step_type: js
    step_config:
      code: "return ctx.spread.iteration_0.item"
    dependencies: ["spread:iteration_0"]
"#,
    );

    pipeline.execute().await.unwrap();

    let spread = recorder.outputs_of("spread");
    assert_eq!(spread.len(), 1);
    assert_eq!(spread[0]["default"]["count"], json!(3));

    // The branch subscriber sees the full named outputs of the producer; its
    // expression picks the bound iteration payload.
    let first = recorder.outputs_of("first");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["default"], json!("a"));
}
