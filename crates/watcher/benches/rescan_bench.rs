//! Rescan pass benchmarks

use std::fs;
use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dirwatch::backend::Backends;
use dirwatch::{FsClass, Method, WatchConfig, WatchModes, WatchRegistry};
use tempfile::TempDir;

fn stat_registry() -> WatchRegistry {
    let config = WatchConfig {
        preferred_backend: Method::Stat,
        network_preferred_backend: Method::Stat,
        ..WatchConfig::default()
    };
    WatchRegistry::new(config, Backends::stat_only(), Box::new(|_: &Path| FsClass::Local))
}

fn populate(dir: &Path, files: usize) {
    for i in 0..files {
        fs::write(dir.join(format!("file_{i:05}.txt")), b"content").unwrap();
    }
}

fn bench_rescan_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("rescan_pass");

    for files in [10, 100, 1000] {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), files);

        let mut registry = stat_registry();
        registry.add_entry(Some(1), temp_dir.path(), None, true, WatchModes::FILES);

        group.bench_with_input(BenchmarkId::from_parameter(files), &files, |b, _| {
            b.iter(|| {
                registry.rescan_pass(true);
                black_box(registry.take_deliveries())
            });
        });
    }

    group.finish();
}

fn bench_add_remove(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    populate(temp_dir.path(), 100);

    c.bench_function("add_remove_dir_files", |b| {
        b.iter(|| {
            let mut registry = stat_registry();
            registry.add_entry(Some(1), temp_dir.path(), None, true, WatchModes::FILES);
            registry.remove_entries(1);
            black_box(registry.len())
        });
    });
}

criterion_group!(benches, bench_rescan_pass, bench_add_remove);
criterion_main!(benches);
