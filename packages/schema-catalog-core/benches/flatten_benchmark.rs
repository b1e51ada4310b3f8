//! Benchmarks for hierarchy-wide DDL and partition pruning.
//!
//! - Superclass edits re-flatten and reinstall every subclass
//! - Pruning runs against the cached context of a partitioned class

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use schema_catalog_core::class::{Attribute, ClassType};
use schema_catalog_core::domain::Domain;
use schema_catalog_core::partition::{CompareOp, PartitionSpec, Predicate};
use schema_catalog_core::{CatalogConfig, SchemaCatalog};
use std::hint::black_box;

/// Builds a base class with `width` attributes and `subclasses` direct
/// subclasses of one attribute each.
fn create_hierarchy(width: usize, subclasses: usize) -> SchemaCatalog {
    let mut catalog = SchemaCatalog::in_memory(CatalogConfig::default());
    let mut base = catalog
        .new_template("base", ClassType::Class)
        .expect("Failed to open base template");
    for i in 0..width {
        base.add_attribute(Attribute::new(format!("a{i}"), Domain::Integer))
            .expect("Failed to add attribute");
    }
    catalog.finish_class(base).expect("Failed to create base");

    for s in 0..subclasses {
        let mut sub = catalog
            .new_template(&format!("sub{s}"), ClassType::Class)
            .expect("Failed to open subclass template");
        catalog.add_superclass(&mut sub, "base").expect("Failed to add superclass");
        sub.add_attribute(Attribute::new("own", Domain::Integer))
            .expect("Failed to add attribute");
        catalog.finish_class(sub).expect("Failed to create subclass");
    }
    catalog.commit_transaction().expect("Failed to commit");
    catalog
}

/// Benchmark: adding one attribute to a superclass with many subclasses
fn bench_superclass_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("superclass_edit");
    for subclasses in [1, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(subclasses), &subclasses, |b, &subclasses| {
            b.iter_batched(
                || create_hierarchy(32, subclasses),
                |mut catalog| {
                    let mut base = catalog.edit_template("base").unwrap();
                    base.add_attribute(Attribute::new("extra", Domain::BigInt)).unwrap();
                    black_box(catalog.finish_class(base).unwrap());
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Benchmark: pruning a HASH partitioned class
fn bench_prune(c: &mut Criterion) {
    let mut catalog = SchemaCatalog::in_memory(CatalogConfig::default());
    let mut template = catalog.new_template("events", ClassType::Class).unwrap();
    template.add_attribute(Attribute::new("k", Domain::Integer)).unwrap();
    catalog.finish_class(template).unwrap();
    catalog.create_partitions("events", PartitionSpec::hash("k", 64)).unwrap();

    let point = Predicate::eq("k", 4242);
    let range = Predicate::And(vec![
        Predicate::compare("k", CompareOp::Ge, 10),
        Predicate::compare("k", CompareOp::Le, 40),
    ]);
    let between = Predicate::between("k", 10, 40);

    c.bench_function("prune_hash_point", |b| {
        b.iter(|| black_box(catalog.prune("events", &point).unwrap()))
    });
    c.bench_function("prune_hash_and", |b| {
        b.iter(|| black_box(catalog.prune("events", &range).unwrap()))
    });
    c.bench_function("prune_hash_between", |b| {
        b.iter(|| black_box(catalog.prune("events", &between).unwrap()))
    });
}

criterion_group!(benches, bench_superclass_edit, bench_prune);
criterion_main!(benches);
