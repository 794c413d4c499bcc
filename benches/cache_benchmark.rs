// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

use viewserver::cache::{FileCache, TemplateCache};
use viewserver::template::{Scope, Template};

const LAYOUT: &str = "<html><head><title>{[{ .title }]}</title></head>\
<body>{[{ block \"content\" }]}{[{ end }]}</body></html>";
const PAGE: &str = "{[{ define \"content\" }]}<ul>{[{ range .items }]}<li>{[{ .name }]}</li>{[{ end }]}</ul>{[{ end }]}";

fn template_cache_hit_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("shared")).unwrap();
    fs::write(dir.path().join("shared/layout.html"), LAYOUT).unwrap();
    fs::write(dir.path().join("page.html"), PAGE).unwrap();
    let cache = TemplateCache::new(dir.path().join("shared"));
    let source = dir.path().join("page.html");
    cache.get_template("page", &source, "layout.html").unwrap();

    c.bench_function("template_cache_hit", |b| {
        b.iter(|| {
            let _ = cache
                .get_template(black_box("page"), &source, black_box("layout.html"))
                .unwrap();
        });
    });
}

fn template_cache_miss_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("shared")).unwrap();
    fs::write(dir.path().join("shared/layout.html"), LAYOUT).unwrap();
    fs::write(dir.path().join("page.html"), PAGE).unwrap();
    let cache = TemplateCache::new(dir.path().join("shared"));
    let source = dir.path().join("page.html");

    c.bench_function("template_cache_miss", |b| {
        b.iter(|| {
            cache.clear_cache();
            let _ = cache
                .get_template(black_box("page"), &source, black_box("layout.html"))
                .unwrap();
        });
    });
}

fn template_execute_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_execute");

    let mut template = Template::new("layout");
    template.parse(LAYOUT).unwrap();
    template.parse(PAGE).unwrap();

    for size in [10, 100, 1000].iter() {
        let items: Vec<_> = (0..*size).map(|i| json!({ "name": format!("item <{}>", i) })).collect();
        let data = json!({ "title": "bench", "items": items });
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut out = Vec::new();
                template.execute(&mut out, &Scope::new(black_box(data))).unwrap();
                out
            });
        });
    }

    group.finish();
}

fn file_cache_get_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_cache_get");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let cache = FileCache::new();
            let content = Bytes::from("body { margin: 0; }");
            for i in 0..size {
                cache.insert_once(&format!("/static/file{}.css", i), content.clone());
            }

            b.iter(|| {
                for i in 0..size {
                    let _ = cache.get(black_box(&format!("/static/file{}.css", i)));
                }
                let _ = cache.get(black_box("/static/missing.css"));
            });
        });
    }

    group.finish();
}

fn file_cache_insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_cache_insert");

    for content_size in [1024, 10240, 102400].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(content_size),
            content_size,
            |b, &content_size| {
                let content = Bytes::from(vec![0u8; content_size]);
                b.iter(|| {
                    let cache = FileCache::new();
                    for i in 0..10 {
                        cache.insert_once(black_box(&format!("/static/file{}.bin", i)), content.clone());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    template_cache_hit_benchmark,
    template_cache_miss_benchmark,
    template_execute_benchmark,
    file_cache_get_benchmark,
    file_cache_insert_benchmark
);
criterion_main!(benches);
