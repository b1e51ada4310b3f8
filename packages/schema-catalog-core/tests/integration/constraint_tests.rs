//! Constraints, shared B-trees and foreign keys.

use ntest::timeout;

use schema_catalog_core::class::{Attribute, ClassType};
use schema_catalog_core::constraint::{Constraint, IndexStatus};
use schema_catalog_core::domain::Domain;
use schema_catalog_core::storage::StorageFault;
use schema_catalog_core::{ErrorKind, IndexOptions, SchemaError, Value};

use super::helpers::{create_class, new_catalog};

#[timeout(1000)]
#[test]
fn test_inherited_unique_shares_btree_until_dropped() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a", "b"], &[])?;
    let name = catalog.add_constraint("base", Constraint::unique(&["a"]))?;
    assert_eq!(name, "u_base_a");
    create_class(&mut catalog, "child", &["c"], &["base"])?;

    let base_unique = catalog.find_class("base")?.properties.find_by_name(&name)?.unwrap();
    let child_unique = catalog.find_class("child")?.properties.find_by_name(&name)?.unwrap();
    let btree = base_unique.btree.unwrap();
    assert_eq!(child_unique.btree, Some(btree));
    assert!(catalog.storage().index_exists(btree));

    let mut template = catalog.edit_template("base")?;
    assert!(matches!(
        template.drop_attribute("a"),
        Err(SchemaError::AttributeInConstraint { .. })
    ));

    catalog.drop_constraint("base", &name)?;
    assert!(!catalog.storage().index_exists(btree));
    assert!(catalog.find_class("child")?.properties.find_by_name(&name)?.is_none());

    let mut template = catalog.edit_template("base")?;
    template.drop_attribute("a")?;
    catalog.finish_class(template)?;
    assert!(catalog.find_class("child")?.find_attribute("a").is_none());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_subclass_rows_are_checked_against_inherited_unique() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    create_class(&mut catalog, "child", &[], &["base"])?;
    catalog.insert_row("base", &[("a", Value::Integer(1))])?;
    catalog.insert_row("child", &[("a", Value::Integer(1))])?;

    let err = catalog.add_constraint("base", Constraint::unique(&["a"])).unwrap_err();
    assert!(matches!(err, SchemaError::UniqueViolation { .. }));
    assert!(catalog.find_class("base")?.constraints()?.is_empty());
    assert!(catalog.find_class("child")?.constraints()?.is_empty());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_constraint_violation_undoes_only_the_change() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["a"], &[])?;
    catalog.insert_row("t", &[("a", Value::Integer(5))])?;
    catalog.insert_row("t", &[("a", Value::Integer(5))])?;
    let indexes = catalog.storage().index_count();
    let repr = catalog.find_class("t")?.repr_id;

    let err = catalog.add_constraint("t", Constraint::unique(&["a"])).unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(catalog.storage().index_count(), indexes);
    assert_eq!(catalog.find_class("t")?.repr_id, repr);
    assert_eq!(catalog.row_count("t")?, 2);

    let name = catalog.add_constraint("t", Constraint::index(&["a"]))?;
    assert_eq!(name, "i_t_a");
    assert_eq!(catalog.storage().index_count(), indexes + 1);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_failing_subclass_undoes_hierarchy_wide_unique() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    for sub in ["c1", "c2", "c3"] {
        create_class(&mut catalog, sub, &[], &["base"])?;
    }
    catalog.insert_row("c1", &[("a", Value::Integer(1))])?;
    catalog.insert_row("c2", &[("a", Value::Integer(2))])?;
    catalog.insert_row("c3", &[("a", Value::Integer(3))])?;
    catalog.insert_row("c3", &[("a", Value::Integer(3))])?;
    let indexes = catalog.storage().index_count();

    let err = catalog.add_constraint("base", Constraint::unique(&["a"])).unwrap_err();
    assert!(matches!(err, SchemaError::UniqueViolation { .. }));
    assert_eq!(catalog.pending_edit_count(), 0);
    assert_eq!(catalog.storage().index_count(), indexes);
    for class in ["base", "c1", "c2", "c3"] {
        assert!(catalog.find_class(class)?.constraints()?.is_empty(), "{class} kept a constraint");
    }
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_storage_failure_rolls_back_constraint() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["a"], &[])?;
    catalog.storage_mut().inject_fault(StorageFault::CreateIndex);

    let err = catalog.add_constraint("t", Constraint::unique(&["a"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(catalog.find_class("t")?.constraints()?.is_empty());

    catalog.add_constraint("t", Constraint::unique(&["a"]))?;
    assert_eq!(catalog.find_class("t")?.constraints()?.len(), 1);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_primary_key_member_cannot_be_dropped() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["id", "v"], &[])?;
    catalog.add_constraint("t", Constraint::primary_key(&["id"]))?;
    assert!(matches!(
        catalog.add_constraint("t", Constraint::primary_key(&["v"])),
        Err(SchemaError::PrimaryKeyExists { .. })
    ));

    let mut template = catalog.edit_template("t")?;
    assert!(matches!(
        template.drop_attribute("id"),
        Err(SchemaError::AttributePrimaryKeyMember { .. })
    ));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_foreign_keys_and_referenced_primary_key() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "parent", &["id"], &[])?;
    catalog.add_constraint("parent", Constraint::primary_key(&["id"]))?;
    catalog.insert_row("parent", &[("id", Value::Integer(1))])?;
    catalog.insert_row("parent", &[("id", Value::Integer(2))])?;

    create_class(&mut catalog, "child", &["pid"], &[])?;
    catalog.insert_row("child", &[("pid", Value::Integer(2))])?;
    let fk = catalog.add_constraint("child", Constraint::foreign_key(&["pid"], "parent"))?;

    let parent = catalog.find_class("parent")?;
    let pk = parent.primary_key()?.unwrap();
    assert_eq!(pk.referrers.len(), 1);
    assert_eq!(pk.referrers[0].name, fk);
    let info = catalog.find_class("child")?.properties.find_by_name(&fk)?.unwrap().foreign_key.unwrap();
    assert_eq!(info.ref_class, Some(parent.id));
    assert_eq!(info.ref_pk_btree, pk.btree);

    create_class(&mut catalog, "orphan", &["pid"], &[])?;
    catalog.insert_row("orphan", &[("pid", Value::Integer(99))])?;
    assert!(matches!(
        catalog.add_constraint("orphan", Constraint::foreign_key(&["pid"], "parent")),
        Err(SchemaError::ForeignKeyViolation { .. })
    ));
    assert!(matches!(
        catalog.add_constraint("orphan", Constraint::foreign_key(&["pid"], "missing")),
        Err(SchemaError::ForeignKeyUnknownClass { .. })
    ));

    assert!(matches!(
        catalog.drop_class("parent", false),
        Err(SchemaError::PrimaryKeyReferenced { .. })
    ));
    catalog.drop_class("parent", true)?;
    assert!(catalog.find_class("parent").is_err());
    assert!(catalog.find_class("child")?.constraints()?.is_empty());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_foreign_key_type_must_match() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "parent", &["id"], &[])?;
    catalog.add_constraint("parent", Constraint::primary_key(&["id"]))?;
    let mut template = catalog.new_template("child", ClassType::Class)?;
    template.add_attribute(Attribute::new("pid", Domain::Varchar(10)))?;
    catalog.finish_class(template)?;

    assert!(matches!(
        catalog.add_constraint("child", Constraint::foreign_key(&["pid"], "parent")),
        Err(SchemaError::ForeignKeyTypeMismatch { .. })
    ));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_online_index_build() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["a"], &[])?;
    for v in 0..10 {
        catalog.insert_row("t", &[("a", Value::Integer(v))])?;
    }
    catalog.commit_transaction()?;

    let name = catalog.add_index("t", Constraint::unique(&["a"]), IndexOptions { online: true })?;
    let constraint = catalog.find_class("t")?.properties.find_by_name(&name)?.unwrap();
    assert_eq!(constraint.status, IndexStatus::Normal);
    let btree = constraint.btree.unwrap();
    assert_eq!(catalog.storage().index_entry_count(btree), Some(10));
    assert_eq!(catalog.storage().index_status(btree), Some(IndexStatus::Normal));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_online_index_rejected_in_hierarchy() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    create_class(&mut catalog, "child", &[], &["base"])?;
    catalog.commit_transaction()?;

    let err = catalog
        .add_index("base", Constraint::index(&["a"]), IndexOptions { online: true })
        .unwrap_err();
    assert!(matches!(err, SchemaError::OnlineIndexNotAllowed { .. }));
    assert!(catalog.find_class("base")?.constraints()?.is_empty());
    Ok(())
}
