//! Catalog snapshots: save, load and consistency checks.

use std::fs;

use ntest::timeout;
use tempfile::TempDir;

use schema_catalog_core::constraint::Constraint;
use schema_catalog_core::partition::{PartitionClause, PartitionSpec, Predicate};
use schema_catalog_core::persistence::read_catalog_file;
use schema_catalog_core::storage::MemoryStorage;
use schema_catalog_core::transaction::MemoryTransactions;
use schema_catalog_core::{CatalogConfig, SchemaCatalog, SchemaError, Value};

use super::helpers::{attribute_names, create_class, new_catalog};

fn sample_catalog() -> anyhow::Result<SchemaCatalog> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["id", "a"], &[])?;
    catalog.add_constraint("base", Constraint::primary_key(&["id"]))?;
    create_class(&mut catalog, "child", &["b"], &["base"])?;
    create_class(&mut catalog, "events", &["k"], &[])?;
    catalog.create_partitions(
        "events",
        PartitionSpec::range(
            "k",
            vec![
                PartitionClause::less_than("old", 100),
                PartitionClause::max_value("new"),
            ],
        ),
    )?;
    catalog.insert_row("events", &[("k", Value::Integer(5))])?;
    catalog.insert_row("events", &[("k", Value::Integer(500))])?;
    catalog.commit_transaction()?;
    Ok(catalog)
}

#[timeout(1000)]
#[test]
fn test_save_and_load_round_trip() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("catalog.json");
    let mut catalog = sample_catalog()?;
    catalog.save_catalog(&path)?;
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let storage = std::mem::take(catalog.storage_mut());
    let loaded = SchemaCatalog::load_catalog(&path, CatalogConfig::default(), storage, MemoryTransactions::default())?;

    assert!(loaded.check_consistency().is_empty());
    assert_eq!(loaded.state().classes.len(), catalog.state().classes.len());
    assert_eq!(attribute_names(&loaded, "child"), vec!["id", "a", "b"]);
    let base = loaded.find_class("base")?;
    assert_eq!(base.id, catalog.find_class("base")?.id);
    assert!(base.primary_key()?.is_some());
    assert_eq!(
        loaded.find_class("child")?.inheritance,
        vec![base.id]
    );

    let events = loaded.find_class("events")?.id;
    assert_eq!(loaded.partition_rows(events).len(), 2);
    assert_eq!(loaded.row_count("events__p__old")?, 1);
    let predicate = Predicate::eq("k", 500);
    assert_eq!(loaded.prune("events", &predicate)?, catalog.prune("events", &predicate)?);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_loaded_catalog_accepts_ddl() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("catalog.json");
    let catalog = sample_catalog()?;
    catalog.save_catalog(&path)?;
    let max_id = catalog.state().classes.keys().max().copied();

    let mut loaded = SchemaCatalog::load_catalog(
        &path,
        CatalogConfig::default(),
        MemoryStorage::new(),
        MemoryTransactions::default(),
    )?;
    let id = create_class(&mut loaded, "later", &["x"], &[])?;
    assert!(Some(id) > max_id);
    assert!(matches!(
        create_class(&mut loaded, "base", &["x"], &[]),
        Err(SchemaError::ClassAlreadyExists(_))
    ));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_corrupted_catalog_is_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("catalog.json");
    sample_catalog()?.save_catalog(&path)?;

    let contents = fs::read_to_string(&path)?;
    let tampered = contents.replacen("events__p__old", "events__p__odd", 1);
    assert_ne!(contents, tampered);
    fs::write(&path, tampered)?;

    assert!(matches!(read_catalog_file(&path), Err(SchemaError::DataCorruption(_))));
    let missing = dir.path().join("missing.json");
    let err = read_catalog_file(&missing).unwrap_err();
    assert!(matches!(err, SchemaError::IoError(_)));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_save_uses_data_dir() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = CatalogConfig {
        data_dir: dir.path().join("nested"),
        ..CatalogConfig::default()
    };
    let mut catalog = SchemaCatalog::in_memory(config.clone());
    create_class(&mut catalog, "t", &["a"], &[])?;
    catalog.save()?;

    let state = read_catalog_file(&config.catalog_path())?;
    assert_eq!(state.names.len(), 1);
    assert!(state.names.contains_key("t"));
    Ok(())
}
