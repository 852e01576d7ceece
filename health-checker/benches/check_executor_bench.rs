use criterion::{black_box, criterion_group, criterion_main, Criterion};
use health_checker::{field_exists, CheckExecutor, MockHttpClient, ProbeSpec, RetryPolicy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "http://bench.example.com/status";

fn bench_field_exists(c: &mut Criterion) {
    let document = json!({
        "status": "ok",
        "data": {"user": {"profile": {"email": "a@b.c", "tags": [1, 2, 3]}}},
    });

    c.bench_function("field_exists_deep_path", |b| {
        b.iter(|| field_exists(black_box(&document), black_box("data.user.profile.email")))
    });
    c.bench_function("field_exists_missing_path", |b| {
        b.iter(|| field_exists(black_box(&document), black_box("data.user.settings.theme")))
    });
}

fn bench_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let http = MockHttpClient::new().with_response(
        URL,
        200,
        r#"{"status": "ok", "data": {"id": 7, "items": [1, 2, 3]}}"#,
    );
    let executor = CheckExecutor::new(
        Arc::new(http),
        RetryPolicy {
            max_retries: 0,
            backoff_base: Duration::ZERO,
        },
    );
    let spec = ProbeSpec::get(
        URL,
        vec![
            "status".to_string(),
            "data.id".to_string(),
            "data.items".to_string(),
            "data.missing".to_string(),
        ],
    );

    let executor = &executor;
    let spec = &spec;
    c.bench_function("execute_mocked_probe", |b| {
        b.to_async(&rt)
            .iter(|| async move { black_box(executor.execute(black_box(spec)).await) })
    });
}

criterion_group!(benches, bench_field_exists, bench_execute);
criterion_main!(benches);
