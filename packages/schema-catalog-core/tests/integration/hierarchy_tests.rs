//! Class hierarchy edits across superclasses and subclasses.

use ntest::timeout;

use schema_catalog_core::class::{Attribute, ClassType};
use schema_catalog_core::domain::Domain;
use schema_catalog_core::transaction::{Authorization, LockMode, TransactionManager};
use schema_catalog_core::{ErrorKind, SchemaError, Value};

use super::helpers::{attribute_names, create_class, new_catalog};

#[timeout(1000)]
#[test]
fn test_superclass_edit_reaches_every_subclass() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    create_class(&mut catalog, "mid", &["b"], &["base"])?;
    create_class(&mut catalog, "leaf", &["c"], &["mid"])?;
    let leaf_repr = catalog.find_class("leaf")?.repr_id;
    let descriptor = catalog.attribute_descriptor("leaf", "a")?;

    let mut base = catalog.edit_template("base")?;
    base.add_attribute(Attribute::new("z", Domain::Integer))?;
    catalog.finish_class(base)?;

    assert_eq!(attribute_names(&catalog, "mid"), vec!["a", "b", "z"]);
    assert_eq!(attribute_names(&catalog, "leaf"), vec!["a", "b", "c", "z"]);
    let base_id = catalog.find_class("base")?.id;
    assert_eq!(catalog.find_class("leaf")?.find_attribute("z").unwrap().origin, Some(base_id));
    assert_eq!(catalog.find_class("leaf")?.repr_id, leaf_repr + 1);
    assert!(!catalog.descriptor_is_valid(&descriptor));
    assert_eq!(catalog.pending_edit_count(), 0);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_inherited_attribute_keeps_id_across_superclass_rename() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    create_class(&mut catalog, "child", &["b"], &["base"])?;
    catalog.insert_row("child", &[("a", Value::Integer(7)), ("b", Value::Integer(8))])?;
    let before = catalog.find_class("child")?.find_attribute("a").unwrap().id;

    let mut base = catalog.edit_template("base")?;
    base.rename_attribute("a", "renamed")?;
    catalog.finish_class(base)?;

    let child = catalog.find_class("child")?;
    assert_eq!(child.find_attribute("renamed").unwrap().id, before);
    let rows = catalog.rows("child")?;
    assert_eq!(catalog.row_value("child", &rows[0], "renamed")?, Value::Integer(7));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_rename_there_and_back_restores_attribute() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["a", "b"], &[])?;
    catalog.insert_row("t", &[("a", Value::Integer(7)), ("b", Value::Integer(8))])?;
    let class = catalog.find_class("t")?;
    let (id, repr) = (class.find_attribute("a").unwrap().id, class.repr_id);

    let mut template = catalog.edit_template("t")?;
    template.rename_attribute("a", "tmp")?;
    catalog.finish_class(template)?;
    assert_eq!(catalog.find_class("t")?.find_attribute("tmp").unwrap().id, id);

    let mut template = catalog.edit_template("t")?;
    template.rename_attribute("tmp", "a")?;
    catalog.finish_class(template)?;

    let class = catalog.find_class("t")?;
    assert_eq!(class.find_attribute("a").unwrap().id, id);
    assert_eq!(class.repr_id, repr);
    let rows = catalog.rows("t")?;
    assert_eq!(catalog.row_value("t", &rows[0], "a")?, Value::Integer(7));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_multiple_inheritance_conflicts() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    let left = create_class(&mut catalog, "left", &["v", "l"], &[])?;
    create_class(&mut catalog, "right", &["v", "r"], &[])?;

    let err = create_class(&mut catalog, "both", &[], &["left", "right"]).unwrap_err();
    assert!(matches!(err, SchemaError::AttributeNameConflict { .. }));
    assert!(catalog.find_class("both").is_err());

    let mut template = catalog.new_template("both", ClassType::Class)?;
    catalog.add_superclass(&mut template, "left")?;
    catalog.add_superclass(&mut template, "right")?;
    catalog.update_class_auto(template)?;

    let both = catalog.find_class("both")?;
    assert_eq!(both.find_attribute("v").unwrap().origin, Some(left));
    assert_eq!(both.resolutions.len(), 1);
    assert_eq!(attribute_names(&catalog, "both"), vec!["v", "l", "r"]);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_stale_template_cycle_is_detected_at_commit() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "a", &["x"], &[])?;
    create_class(&mut catalog, "b", &["y"], &[])?;

    let mut stale = catalog.edit_template("a")?;
    catalog.add_superclass(&mut stale, "b")?;

    let mut b = catalog.edit_template("b")?;
    catalog.add_superclass(&mut b, "a")?;
    catalog.finish_class(b)?;

    let err = catalog.finish_class(stale).unwrap_err();
    assert!(matches!(err, SchemaError::CycleDetected { .. }));
    assert_eq!(catalog.pending_edit_count(), 0);
    assert!(catalog.find_class("a")?.inheritance.is_empty());
    let a = catalog.find_class("a")?.id;
    assert_eq!(catalog.find_class("b")?.inheritance, vec![a]);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_subclasses_are_locked_for_the_edit() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    let base = create_class(&mut catalog, "base", &["a"], &[])?;
    let child = create_class(&mut catalog, "child", &[], &["base"])?;
    let other = create_class(&mut catalog, "other", &["o"], &[])?;
    catalog.commit_transaction()?;

    let mut template = catalog.edit_template("base")?;
    template.add_attribute(Attribute::new("b", Domain::Integer))?;
    catalog.finish_class(template)?;

    assert_eq!(catalog.transactions().held_lock(base), Some(LockMode::Update));
    assert_eq!(catalog.transactions().held_lock(child), Some(LockMode::Update));
    assert_eq!(catalog.transactions().held_lock(other), None);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_denied_authorization_changes_nothing() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "base", &["a"], &[])?;
    catalog.transactions_mut().deny("base", Authorization::Alter);

    let mut template = catalog.edit_template("base")?;
    template.add_attribute(Attribute::new("b", Domain::Integer))?;
    let err = catalog.finish_class(template).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(attribute_names(&catalog, "base"), vec!["a"]);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_variable_length_attributes_are_stored_last() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    let mut template = catalog.new_template("t", ClassType::Class)?;
    template.add_attribute(Attribute::new("label", Domain::Varchar(20)))?;
    template.add_attribute(Attribute::new("n", Domain::Integer))?;
    catalog.finish_class(template)?;
    assert_eq!(attribute_names(&catalog, "t"), vec!["n", "label"]);

    let mut template = catalog.edit_template("t")?;
    template.add_attribute(Attribute::new("m", Domain::BigInt))?;
    catalog.finish_class(template)?;
    assert_eq!(attribute_names(&catalog, "t"), vec!["n", "m", "label"]);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_comment_change_keeps_representation() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["a"], &[])?;
    let repr = catalog.find_class("t")?.repr_id;

    let mut template = catalog.edit_template("t")?;
    template.set_comment(Some("audit table".to_string()));
    catalog.finish_class(template)?;

    let class = catalog.find_class("t")?;
    assert_eq!(class.repr_id, repr);
    assert_eq!(class.comment.as_deref(), Some("audit table"));
    Ok(())
}
