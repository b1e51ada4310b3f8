//! Partition creation, reorganization, routing and pruning.

use ntest::timeout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use schema_catalog_core::class::{Attribute, ClassType};
use schema_catalog_core::constraint::Constraint;
use schema_catalog_core::domain::Domain;
use schema_catalog_core::partition::{CompareOp, PartitionClause, PartitionSpec, Predicate};
use schema_catalog_core::{ClassId, IndexOptions, SchemaCatalog, SchemaError, Value};

use super::helpers::{create_class, new_catalog};

fn range_clauses() -> Vec<PartitionClause> {
    vec![
        PartitionClause::less_than("p_low", 10),
        PartitionClause::less_than("p_mid", 20),
        PartitionClause::max_value("p_high"),
    ]
}

fn total_rows(catalog: &SchemaCatalog, parent: &str) -> anyhow::Result<u64> {
    let mut total = catalog.row_count(parent)?;
    for row in catalog.partition_rows(catalog.find_class(parent)?.id) {
        total += catalog.row_count(&catalog.class_name(row.child))?;
    }
    Ok(total)
}

#[timeout(1000)]
#[test]
fn test_range_partitioning_moves_existing_rows() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    let sales = create_class(&mut catalog, "sales", &["id", "amount"], &[])?;
    for (id, amount) in [(1, 5), (2, 15), (3, 25), (4, 100)] {
        catalog.insert_row("sales", &[("id", Value::Integer(id)), ("amount", Value::Integer(amount))])?;
    }

    let children = catalog.create_partitions("sales", PartitionSpec::range("amount", range_clauses()))?;
    assert_eq!(children.len(), 3);
    assert_eq!(catalog.row_count("sales")?, 0);
    assert_eq!(catalog.row_count("sales__p__p_low")?, 1);
    assert_eq!(catalog.row_count("sales__p__p_mid")?, 1);
    assert_eq!(catalog.row_count("sales__p__p_high")?, 2);

    let parent_amount = catalog.find_class("sales")?.find_attribute("amount").unwrap().id;
    for child in &children {
        let class = catalog.class(*child).unwrap();
        assert_eq!(class.find_attribute("amount").unwrap().id, parent_amount);
        assert_eq!(class.inheritance, vec![sales]);
    }

    let target = catalog.insert_row("sales", &[("id", Value::Integer(5)), ("amount", Value::Integer(12))])?;
    assert_eq!(target, children[1]);
    assert_eq!(catalog.partition_for_value("sales", &Value::Integer(-3))?, children[0]);
    assert_eq!(catalog.partition_for_value("sales", &Value::Integer(20))?, children[2]);
    assert_eq!(catalog.partition_rows(sales).len(), 3);
    assert!(catalog.check_consistency().is_empty());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_invalid_partition_requests() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;

    let decreasing = vec![PartitionClause::less_than("a", 20), PartitionClause::less_than("b", 10)];
    assert!(matches!(
        catalog.create_partitions("t", PartitionSpec::range("k", decreasing)),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    let duplicate = vec![PartitionClause::less_than("a", 10), PartitionClause::less_than("a", 20)];
    assert!(matches!(
        catalog.create_partitions("t", PartitionSpec::range("k", duplicate)),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    assert!(matches!(
        catalog.create_partitions("t", PartitionSpec::hash("k", 0)),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    assert!(matches!(
        catalog.create_partitions("t", PartitionSpec::hash("missing", 2)),
        Err(SchemaError::AttributeNotFound { .. })
    ));

    catalog.create_partitions("t", PartitionSpec::hash("k", 2))?;
    assert!(matches!(
        catalog.create_partitions("t__p__p0", PartitionSpec::hash("k", 2)),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    let mut template = catalog.new_template("u", ClassType::Class)?;
    assert!(matches!(
        catalog.add_superclass(&mut template, "t"),
        Err(SchemaError::IncompatibleSuperClass { .. })
    ));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_failed_partitioning_changes_nothing() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    catalog.insert_row("t", &[("k", Value::Integer(5))])?;
    catalog.insert_row("t", &[("k", Value::Integer(500))])?;

    let clauses = vec![PartitionClause::less_than("p0", 10), PartitionClause::less_than("p1", 100)];
    let err = catalog.create_partitions("t", PartitionSpec::range("k", clauses)).unwrap_err();
    assert!(matches!(err, SchemaError::PartitionNotExist { .. }));

    let class = catalog.find_class("t")?;
    assert!(class.partition.is_none());
    assert!(class.users.is_empty());
    assert!(catalog.find_class("t__p__p0").is_err());
    assert_eq!(catalog.row_count("t")?, 2);
    let t = class_id(&catalog, "t");
    assert_eq!(catalog.insert_row("t", &[("k", Value::Integer(7))])?, t);
    Ok(())
}

fn class_id(catalog: &SchemaCatalog, name: &str) -> ClassId {
    catalog.class_id(name).unwrap_or(ClassId(0))
}

#[timeout(1000)]
#[test]
fn test_range_add_and_drop_partitions() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    let clauses = vec![
        PartitionClause::less_than("p0", 10),
        PartitionClause::less_than("p1", 20),
        PartitionClause::less_than("p2", 30),
    ];
    let children = catalog.create_partitions("t", PartitionSpec::range("k", clauses))?;
    catalog.insert_row("t", &[("k", Value::Integer(15))])?;

    assert!(matches!(
        catalog.add_partitions("t", vec![PartitionClause::less_than("p3", 25)]),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    let added = catalog.add_partitions("t", vec![PartitionClause::max_value("p3")])?;
    assert_eq!(catalog.partition_for_value("t", &Value::Integer(1000))?, added[0]);

    catalog.drop_partitions("t", &["p1"])?;
    assert!(catalog.class(children[1]).is_none());
    assert_eq!(catalog.partition_for_value("t", &Value::Integer(15))?, children[2]);
    assert_eq!(catalog.row_count("t__p__p2")?, 0);
    assert_eq!(total_rows(&catalog, "t")?, 0);
    assert!(matches!(
        catalog.drop_partitions("t", &["p0", "p2", "p3"]),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    assert!(catalog.check_consistency().is_empty());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_list_partitions_reorganize() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    let clauses = vec![
        PartitionClause::values_in("a", vec![Value::Integer(1), Value::Integer(2)]),
        PartitionClause::values_in("b", vec![Value::Integer(3)]),
    ];
    let children = catalog.create_partitions("t", PartitionSpec::list("k", clauses))?;
    for k in [1, 2, 2, 3] {
        catalog.insert_row("t", &[("k", Value::Integer(k))])?;
    }
    assert!(matches!(
        catalog.insert_row("t", &[("k", Value::Integer(4))]),
        Err(SchemaError::PartitionNotExist { .. })
    ));

    assert!(matches!(
        catalog.reorganize_partitions("t", &["a"], vec![PartitionClause::values_in("a1", vec![Value::Integer(1)])]),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    let created = catalog.reorganize_partitions(
        "t",
        &["a"],
        vec![
            PartitionClause::values_in("a1", vec![Value::Integer(1)]),
            PartitionClause::values_in("a2", vec![Value::Integer(2), Value::Integer(4)]),
        ],
    )?;
    assert_eq!(created.len(), 2);
    assert!(catalog.class(children[0]).is_none());
    assert_eq!(catalog.row_count("t__p__a1")?, 1);
    assert_eq!(catalog.row_count("t__p__a2")?, 2);
    assert_eq!(catalog.row_count("t__p__b")?, 1);
    assert_eq!(catalog.partition_for_value("t", &Value::Integer(4))?, created[1]);

    let parent = catalog.find_class("t")?;
    let order = parent.partition.as_ref().and_then(|p| p.parent_info()).unwrap().partitions.clone();
    assert_eq!(order, vec![created[0], created[1], children[1]]);
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_hash_partitions_rehash() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    catalog.create_partitions("t", PartitionSpec::hash("k", 2))?;
    for k in 1..=20 {
        catalog.insert_row("t", &[("k", Value::Integer(k))])?;
    }

    catalog.add_hash_partitions("t", 2)?;
    assert_eq!(catalog.partition_rows(class_id(&catalog, "t")).len(), 4);
    assert_eq!(total_rows(&catalog, "t")?, 20);
    for row in catalog.partition_rows(class_id(&catalog, "t")) {
        let child = catalog.class_name(row.child);
        for stored in catalog.rows(&child)? {
            let k = catalog.row_value(&child, &stored, "k")?;
            assert_eq!(catalog.partition_for_value("t", &k)?, row.child);
        }
    }

    catalog.coalesce_partitions("t", 3)?;
    assert_eq!(catalog.row_count("t__p__p0")?, 20);
    assert!(matches!(
        catalog.coalesce_partitions("t", 1),
        Err(SchemaError::InvalidPartitionRequest { .. })
    ));
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_remove_partitioning_moves_rows_back() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    catalog.create_partitions("t", PartitionSpec::hash("k", 3))?;
    for k in 0..9 {
        catalog.insert_row("t", &[("k", Value::Integer(k))])?;
    }

    catalog.remove_partitioning("t")?;
    let class = catalog.find_class("t")?;
    assert!(class.partition.is_none());
    assert!(class.users.is_empty());
    assert_eq!(catalog.row_count("t")?, 9);
    assert!(catalog.partition_rows(class.id).is_empty());
    assert!(catalog.find_class("t__p__p0").is_err());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_local_index_added_to_every_partition() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k", "v"], &[])?;
    catalog.create_partitions("t", PartitionSpec::hash("k", 2))?;

    let name = catalog.add_index("t", Constraint::index(&["v"]), IndexOptions::default())?;
    let parent_btree = catalog.find_class("t")?.properties.find_by_name(&name)?.unwrap().btree;
    for child in ["t__p__p0", "t__p__p1"] {
        let index = catalog.find_class(child)?.properties.find_by_name(&name)?.unwrap();
        assert!(index.btree.is_some());
        assert_ne!(index.btree, parent_btree);
    }

    catalog.drop_index("t", &name)?;
    assert!(catalog.find_class("t__p__p0")?.properties.find_by_name(&name)?.is_none());
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_unique_on_partitions_gets_a_btree_per_partition() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k", "v"], &[])?;
    catalog.create_partitions("t", PartitionSpec::hash("k", 3))?;

    let name = catalog.add_constraint("t", Constraint::unique(&["k"]))?;
    let mut btrees = Vec::new();
    for child in ["t__p__p0", "t__p__p1", "t__p__p2"] {
        let unique = catalog.find_class(child)?.properties.find_by_name(&name)?.unwrap();
        let btree = unique.btree.unwrap();
        assert!(catalog.storage().index_exists(btree));
        assert!(!btrees.contains(&btree), "{child} shares a B-tree");
        btrees.push(btree);
    }
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_pruning_context_is_cached_and_invalidated() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    create_class(&mut catalog, "t", &["k"], &[])?;
    let children = catalog.create_partitions("t", PartitionSpec::range("k", range_clauses()))?;

    let pruned = catalog.prune("t", &Predicate::compare("k", CompareOp::Lt, 10))?;
    assert_eq!(pruned, vec![children[0]]);
    assert_eq!(catalog.partition_cache().len(), 1);

    catalog.drop_partitions("t", &["p_low"])?;
    assert!(catalog.partition_cache().is_empty());
    let pruned = catalog.prune("t", &Predicate::compare("k", CompareOp::Lt, 10))?;
    assert_eq!(pruned, vec![children[1]]);
    Ok(())
}

/// Evaluates a predicate over a single non-null key.
fn holds(predicate: &Predicate, key: i64) -> bool {
    let value = Value::Integer(key);
    match predicate {
        Predicate::Compare { op, value: c, .. } => {
            let c = c.as_integer().unwrap_or_default();
            match op {
                CompareOp::Eq => key == c,
                CompareOp::Ne => key != c,
                CompareOp::Lt => key < c,
                CompareOp::Le => key <= c,
                CompareOp::Gt => key > c,
                CompareOp::Ge => key >= c,
            }
        }
        Predicate::Between { low, high, .. } => {
            low.as_integer().is_some_and(|l| key >= l) && high.as_integer().is_some_and(|h| key <= h)
        }
        Predicate::In { values, negated, .. } => values.contains(&value) != *negated,
        Predicate::IsNull { negated, .. } => *negated,
        Predicate::And(parts) => parts.iter().all(|p| holds(p, key)),
        Predicate::Or(parts) => parts.iter().any(|p| holds(p, key)),
        Predicate::Not(inner) => !holds(inner, key),
        Predicate::Opaque => true,
    }
}

fn random_leaf(rng: &mut StdRng) -> Predicate {
    let c = rng.gen_range(-20..60);
    match rng.gen_range(0..5) {
        0 => {
            let ops = [CompareOp::Eq, CompareOp::Ne, CompareOp::Lt, CompareOp::Le, CompareOp::Gt, CompareOp::Ge];
            Predicate::compare("k", ops[rng.gen_range(0..ops.len())], c)
        }
        1 => Predicate::between("k", c, c + rng.gen_range(0..30)),
        2 => Predicate::in_list("k", (0..3).map(|_| Value::Integer(rng.gen_range(-20..60))).collect()),
        3 => Predicate::is_null("k"),
        _ => Predicate::not(Predicate::compare("k", CompareOp::Ge, c)),
    }
}

fn random_predicate(rng: &mut StdRng) -> Predicate {
    match rng.gen_range(0..4) {
        0 => Predicate::And(vec![random_leaf(rng), random_leaf(rng)]),
        1 => Predicate::Or(vec![random_leaf(rng), random_leaf(rng)]),
        _ => random_leaf(rng),
    }
}

fn assert_pruning_sound(catalog: &SchemaCatalog, parent: &str, rng: &mut StdRng) -> anyhow::Result<()> {
    for _ in 0..300 {
        let predicate = random_predicate(rng);
        let kept = catalog.prune(parent, &predicate)?;
        for key in -25..65 {
            if holds(&predicate, key) {
                let home = catalog.partition_for_value(parent, &Value::Integer(key))?;
                assert!(
                    kept.contains(&home),
                    "{predicate:?} pruned the partition of key {key}"
                );
            }
        }
    }
    Ok(())
}

#[timeout(5000)]
#[test]
fn test_pruning_never_drops_a_matching_partition() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);

    let mut catalog = new_catalog();
    create_class(&mut catalog, "by_range", &["k"], &[])?;
    let clauses = vec![
        PartitionClause::less_than("r0", 0),
        PartitionClause::less_than("r1", 15),
        PartitionClause::less_than("r2", 40),
        PartitionClause::max_value("r3"),
    ];
    catalog.create_partitions("by_range", PartitionSpec::range("k", clauses))?;
    assert_pruning_sound(&catalog, "by_range", &mut rng)?;

    create_class(&mut catalog, "by_hash", &["k"], &[])?;
    catalog.create_partitions("by_hash", PartitionSpec::hash("k", 5))?;
    assert_pruning_sound(&catalog, "by_hash", &mut rng)?;

    create_class(&mut catalog, "by_list", &["k"], &[])?;
    let mut clauses = Vec::new();
    for p in 0..9 {
        let values = (0..10).map(|i| Value::Integer(-25 + p * 10 + i)).collect();
        clauses.push(PartitionClause::values_in(format!("l{p}"), values));
    }
    catalog.create_partitions("by_list", PartitionSpec::list("k", clauses))?;
    assert_pruning_sound(&catalog, "by_list", &mut rng)?;
    Ok(())
}

#[timeout(1000)]
#[test]
fn test_expression_key_disables_pruning() -> anyhow::Result<()> {
    let mut catalog = new_catalog();
    let mut template = catalog.new_template("t", ClassType::Class)?;
    template.add_attribute(Attribute::new("k", Domain::Integer))?;
    catalog.finish_class(template)?;

    let mut spec = PartitionSpec::hash("k", 3);
    spec.key.expression = Some("k % 7".to_string());
    let children = catalog.create_partitions("t", spec)?;
    assert_eq!(catalog.prune("t", &Predicate::eq("k", 1))?, children);
    assert_eq!(catalog.partition_rows(class_id(&catalog, "t"))[0].expression, "k % 7");
    Ok(())
}
