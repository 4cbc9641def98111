use vllm_provision::artifact;
use vllm_provision::collect::{collect, Overrides};
use vllm_provision::context::ProvisionContext;
use vllm_provision::defaults::builtin_defaults;
use vllm_provision::paths::Layout;
use vllm_provision::service::{self, ModelSource};
use vllm_provision::utils::template;

fn context(overrides: &Overrides) -> ProvisionContext {
    collect(&builtin_defaults(), overrides, None).unwrap()
}

fn launcher(overrides: &Overrides) -> String {
    let ctx = context(overrides);
    let layout = Layout::resolve(&ctx, &builtin_defaults()).unwrap();
    artifact::render_launcher(&ctx, &layout).unwrap().contents
}

fn changed_lines(a: &str, b: &str) -> Vec<(String, String)> {
    assert_eq!(a.lines().count(), b.lines().count());
    a.lines()
        .zip(b.lines())
        .filter(|(x, y)| x != y)
        .map(|(x, y)| (x.to_string(), y.to_string()))
        .collect()
}

#[test]
fn launcher_rendering_is_byte_identical() {
    let overrides = Overrides {
        max_model_len: Some("8192".to_string()),
        dtype: Some("bfloat16".to_string()),
        ..Overrides::default()
    };
    assert_eq!(launcher(&overrides), launcher(&overrides));
}

#[test]
fn changing_port_changes_only_the_port() {
    let base = launcher(&Overrides::default());
    let moved = launcher(&Overrides {
        port: Some("8001".to_string()),
        ..Overrides::default()
    });

    let changed = changed_lines(&base, &moved);
    assert_eq!(changed.len(), 1);
    let (before, after) = &changed[0];
    assert_eq!(after.replacen("--port 8001", "--port 8000", 1), *before);
}

#[test]
fn changing_memory_fraction_changes_only_that_argument() {
    let base = launcher(&Overrides::default());
    let tuned = launcher(&Overrides {
        gpu_memory_utilization: Some("0.85".to_string()),
        ..Overrides::default()
    });

    let changed = changed_lines(&base, &tuned);
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed[0].1.replacen("--gpu-memory-utilization 0.85", "--gpu-memory-utilization 0.90", 1),
        changed[0].0
    );
}

#[test]
fn every_artifact_is_fully_resolved() {
    let defaults = builtin_defaults();
    let ctx = context(&Overrides::default());
    let layout = Layout::resolve(&ctx, &defaults).unwrap();
    let source = ModelSource::HuggingFace("Qwen/Qwen2.5-7B-Instruct".to_string());

    let rendered = [
        artifact::render_launcher(&ctx, &layout).unwrap(),
        artifact::render_help(&ctx, &layout, &defaults).unwrap(),
        service::render_unit(&ctx, &layout, &defaults, &source).unwrap(),
    ];
    for artifact in rendered {
        assert!(
            template::placeholders(&artifact.contents).is_empty(),
            "{} has unresolved placeholders",
            artifact.name
        );
    }
}

#[test]
fn unit_rendering_is_deterministic_per_source() {
    let defaults = builtin_defaults();
    let ctx = context(&Overrides::default());
    let layout = Layout::resolve(&ctx, &defaults).unwrap();
    let source = ModelSource::HuggingFace("meta-llama/Llama-3.1-8B-Instruct".to_string());

    let a = service::render_unit(&ctx, &layout, &defaults, &source).unwrap();
    let b = service::render_unit(&ctx, &layout, &defaults, &source).unwrap();
    assert_eq!(a.contents, b.contents);
    assert_eq!(a.digest(), b.digest());
}
