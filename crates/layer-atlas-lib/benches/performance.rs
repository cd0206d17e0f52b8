//! Performance benchmarks for layer-atlas-lib
//!
//! Run with: cargo bench --package layer-atlas-lib

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use geo::point;
use layer_atlas_lib::{
    ClusterConfig, ClusterEngine, FeatureFilter, FeatureStore, GeoImporter, ImportConfig,
    ImportTarget, MemoryStore, NewFeature, NewLayer, PageRequest, SpatialFilter, ValidityFilter,
    exporter, geojson,
};
use serde_json::json;
use std::sync::Arc;

/// Points scattered over roughly one degree around Strasbourg
fn generate_points(n: usize) -> Vec<NewFeature> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let lon = 7.2 + t + (t * 500.0).sin() * 0.01;
            let lat = 48.1 + (t * 37.0).fract() + (t * 300.0).cos() * 0.01;
            let year = 1800 + (i % 220) as i32;
            NewFeature::new(
                point!(x: lon, y: lat),
                Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(),
            )
            .with_properties(json!({"name": format!("F{}", i)}).as_object().unwrap())
        })
        .collect()
}

fn populated_store(n: usize) -> (MemoryStore, u64) {
    let store = MemoryStore::new();
    let layer = store.create_layer(NewLayer::named("bench")).unwrap();
    store.insert_batch(layer.id, generate_points(n)).unwrap();
    (store, layer.id)
}

/// GeoJSON document with `n` point features
fn generate_document(n: usize) -> String {
    let features = (0..n)
        .map(|i| {
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [7.0 + i as f64 * 1e-4, 48.0]},
                "properties": {"year": 1900 + (i % 100), "name": format!("F{}", i)}
            })
        })
        .collect();
    geojson::feature_collection(features).to_string()
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_query_performance(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let (store, layer_id) = populated_store(50_000);
    let page = PageRequest::new(1, 100).unwrap();

    let small = FeatureFilter::layer(layer_id)
        .with_spatial(SpatialFilter::from_params(Some("7.5,48.5,7.51,48.51"), None, None));
    group.bench_function("small_bbox_50k", |b| {
        b.iter(|| store.query(&small, page).unwrap());
    });

    let buffered = FeatureFilter::layer(layer_id).with_spatial(SpatialFilter::from_params(
        Some("7.5,48.5,7.6,48.6"),
        Some("within"),
        Some(500.0),
    ));
    group.bench_function("buffered_within_50k", |b| {
        b.iter(|| store.query(&buffered, page).unwrap());
    });

    let temporal = FeatureFilter::layer(layer_id).with_validity(ValidityFilter::new(
        Some(Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap()),
        None,
    ));
    group.bench_function("validity_only_50k", |b| {
        b.iter(|| store.query(&temporal, page).unwrap());
    });

    group.finish();
}

fn bench_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");
    group.sample_size(20);

    let engine = ClusterEngine::new(ClusterConfig::default());
    for size in [1_000usize, 5_000] {
        let (store, layer_id) = populated_store(size);
        let features = store.scan(&FeatureFilter::layer(layer_id)).unwrap();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("greedy", size), &features, |b, features| {
            b.iter(|| engine.cluster(features, Some(8.0), Some(500.0)));
        });
    }

    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("import");
    group.sample_size(20);

    let document = generate_document(10_000);
    let config = ImportConfig::default();

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("geojson_10k", |b| {
        b.iter(|| {
            let store = MemoryStore::new();
            GeoImporter::new(&store, &config)
                .import_str(ImportTarget::new_layer("bench"), "bench.geojson", &document)
                .unwrap()
        });
    });

    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    let (store, layer_id) = populated_store(10_000);
    let features: Vec<Arc<_>> = store.scan(&FeatureFilter::layer(layer_id)).unwrap();

    group.bench_function("csv_10k", |b| {
        b.iter(|| exporter::write_csv(&exporter::to_table(&features, "bench")));
    });

    group.bench_function("geojson_10k", |b| {
        b.iter(|| exporter::to_exchange_format(&features, "bench").to_string());
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_query_performance,
    bench_clustering,
    bench_import,
    bench_export,
);

criterion_main!(benches);
