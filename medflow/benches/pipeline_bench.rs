//! Benchmarks for validation scoring and full pipeline runs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use medflow::collaborators::TemplatePromptBuilder;
use medflow::config::ValidationConfig;
use medflow::models::{Modality, StandardizedImage};
use medflow::stages::assess;
use medflow::testing::{raster_mask, sample_input, two_confident_masks, MockSegmentation, TestHarness};

fn validation_benchmark(c: &mut Criterion) {
    let image = StandardizedImage::new("norm://bench", Modality::XRay, 512, 512);
    let config = ValidationConfig::default();
    let masks: Vec<_> = (0..16)
        .map(|i| raster_mask(&format!("structure-{i}"), 0.6 + f64::from(i) * 0.02, 64, 64, 900))
        .collect();

    c.bench_function("assess_16_masks", |b| {
        b.iter(|| assess(black_box(&masks), "lung & heart", &image, &config));
    });

    let prompts = TemplatePromptBuilder::new();
    c.bench_function("resolve_prompt", |b| {
        b.iter(|| {
            prompts.resolve(
                black_box(Modality::Other),
                None,
                Some("nodule, effusion; consolidation & atelectasis"),
            )
        });
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let harness = TestHarness::new(MockSegmentation::returning(two_confident_masks()));

    c.bench_function("process_one", |b| {
        b.iter(|| {
            runtime.block_on(async {
                harness
                    .orchestrator
                    .process_one(black_box(sample_input("BENCH-1")))
                    .await
                    .unwrap()
            })
        });
    });

    c.bench_function("process_batch_16", |b| {
        b.iter(|| {
            let inputs = (0..16).map(|i| sample_input(&format!("BENCH-{i}"))).collect();
            runtime.block_on(harness.orchestrator.process_batch(inputs))
        });
    });
}

criterion_group!(benches, validation_benchmark, pipeline_benchmark);
criterion_main!(benches);
