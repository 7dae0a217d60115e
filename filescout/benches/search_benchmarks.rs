use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use filescout::{execute, Parameters, SearchOptions, SearchParams};
use std::{fs::File, io::Write};
use tempfile::tempdir;

fn create_test_files(
    dir: &tempfile::TempDir,
    file_count: usize,
    lines_per_file: usize,
) -> std::io::Result<()> {
    for i in 0..file_count {
        let sub = dir.path().join(format!("dir_{}", i % 4));
        std::fs::create_dir_all(&sub)?;
        let mut file = File::create(sub.join(format!("test_{}.log", i)))?;
        for j in 0..lines_per_file {
            writeln!(
                file,
                "Line {} user=alice action=login src=10.0.0.{} status=ok",
                j,
                j % 255
            )?;
        }
    }
    Ok(())
}

fn params_for(dir: &tempfile::TempDir, search: SearchParams) -> Parameters {
    let mut params = Parameters::default();
    params.searches.insert(
        "bench".to_string(),
        SearchParams {
            paths: vec![dir.path().display().to_string()],
            ..search
        },
    );
    params
}

fn bench_criteria(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_test_files(&dir, 40, 500).unwrap();

    let cases = [
        (
            "name",
            SearchParams {
                names: vec![r"^test_\d+\.log$".to_string()],
                ..Default::default()
            },
        ),
        (
            "content",
            SearchParams {
                contents: vec!["status=failed".to_string()],
                ..Default::default()
            },
        ),
        (
            "sha256",
            SearchParams {
                sha2: vec!["0".repeat(64)],
                ..Default::default()
            },
        ),
        (
            "bytes",
            SearchParams {
                bytes: vec!["4d5a9000".to_string()],
                ..Default::default()
            },
        ),
    ];

    let mut group = c.benchmark_group("criteria");
    for (name, search) in cases {
        let params = params_for(&dir, search);
        group.bench_with_input(BenchmarkId::from_parameter(name), &params, |b, params| {
            b.iter(|| execute(black_box(params)))
        });
    }
    group.finish();
}

fn bench_match_all(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_test_files(&dir, 40, 500).unwrap();

    let params = params_for(
        &dir,
        SearchParams {
            names: vec![r"\.log$".to_string()],
            sizes: vec![">1k".to_string()],
            contents: vec!["src=10\\.0\\.0\\.254".to_string()],
            options: SearchOptions {
                match_all: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    c.bench_function("match_all", |b| b.iter(|| execute(black_box(&params))));
}

fn bench_file_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_count");
    for count in [10, 100, 500] {
        let dir = tempdir().unwrap();
        create_test_files(&dir, count, 20).unwrap();
        let params = params_for(
            &dir,
            SearchParams {
                contents: vec!["user=bob".to_string()],
                ..Default::default()
            },
        );
        group.bench_with_input(BenchmarkId::from_parameter(count), &params, |b, params| {
            b.iter(|| execute(black_box(params)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_criteria, bench_match_all, bench_file_count);
criterion_main!(benches);
