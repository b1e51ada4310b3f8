//! CLI tool for inspecting saved schema catalogs.
//!
//! Provides commands for:
//! - Listing classes and showing one class in detail
//! - Cross-checking the catalog records
//! - Listing partitions and trying out partition pruning

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use schema_catalog_core::class::Class;
use schema_catalog_core::partition::{CompareOp, Predicate};
use schema_catalog_core::storage::MemoryStorage;
use schema_catalog_core::transaction::MemoryTransactions;
use schema_catalog_core::{CatalogConfig, SchemaCatalog, Value};

/// Command-line arguments for the schema tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding catalog.json
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List classes, or show one class
    Show {
        /// Class to show
        class: Option<String>,

        /// Print the class record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cross-check the catalog records
    Check,

    /// List the partitions of a partitioned class
    Partitions {
        /// Partitioned class
        class: String,
    },

    /// Show which partitions a comparison on the key keeps
    Prune {
        /// Partitioned class
        class: String,

        /// Attribute compared
        attribute: String,

        /// Comparison operator
        #[arg(value_enum)]
        op: Op,

        /// Literal; integers and floats are recognized, `null` is NULL
        value: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl From<Op> for CompareOp {
    fn from(op: Op) -> Self {
        match op {
            Op::Eq => CompareOp::Eq,
            Op::Ne => CompareOp::Ne,
            Op::Lt => CompareOp::Lt,
            Op::Le => CompareOp::Le,
            Op::Gt => CompareOp::Gt,
            Op::Ge => CompareOp::Ge,
        }
    }
}

fn parse_value(text: &str) -> Value {
    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = text.parse::<i64>() {
        return Value::Integer(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Text(text.to_string())
}

fn print_class(catalog: &SchemaCatalog, class: &Class) -> anyhow::Result<()> {
    println!("{} ({}) {:?} repr {}", class.name, class.id, class.class_type, class.repr_id);
    if !class.inheritance.is_empty() {
        let supers: Vec<String> = class.inheritance.iter().map(|c| catalog.class_name(*c)).collect();
        println!("  under: {}", supers.join(", "));
    }
    for attribute in &class.attributes {
        let origin = match attribute.origin {
            Some(origin) if origin != class.id => format!(" from {}", catalog.class_name(origin)),
            _ => String::new(),
        };
        let not_null = if attribute.not_null { " NOT NULL" } else { "" };
        println!("  {} {}{not_null}{origin}", attribute.name, attribute.domain);
    }
    for constraint in class.constraints()? {
        let columns: Vec<&str> = constraint.columns.iter().map(|c| c.name.as_str()).collect();
        println!("  {:?} {} ({})", constraint.kind, constraint.name, columns.join(", "));
    }
    if let Some(comment) = &class.comment {
        println!("  comment: {comment}");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt::init();

    let config = CatalogConfig {
        data_dir: cli.data_dir,
        ..CatalogConfig::default()
    };
    let path = config.catalog_path();
    let catalog = SchemaCatalog::load_catalog(&path, config, MemoryStorage::new(), MemoryTransactions::default())
        .with_context(|| format!("Failed to load catalog from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "catalog opened");

    match cli.command {
        Commands::Show { class: None, .. } => {
            for class in catalog.classes() {
                println!("{}\t{}\t{:?}\t{} attributes", class.id, class.name, class.class_type, class.attributes.len());
            }
        }
        Commands::Show { class: Some(name), json } => {
            let class = catalog.find_class(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(class)?);
            } else {
                print_class(&catalog, class)?;
            }
        }
        Commands::Check => {
            let problems = catalog.check_consistency();
            for problem in &problems {
                tracing::error!("{}", problem);
            }
            if !problems.is_empty() {
                bail!("{} catalog problems found", problems.len());
            }
            println!("catalog is consistent");
        }
        Commands::Partitions { class } => {
            let id = catalog.find_class(&class)?.id;
            let rows = catalog.partition_rows(id);
            if rows.is_empty() {
                bail!("class '{class}' is not partitioned");
            }
            for row in rows {
                let values: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
                println!("{}\t{}\t{}\t{}\t[{}]", row.name, catalog.class_name(row.child), row.kind, row.expression, values.join(", "));
            }
        }
        Commands::Prune {
            class,
            attribute,
            op,
            value,
        } => {
            let predicate = Predicate::compare(&attribute, op.into(), parse_value(&value));
            for child in catalog.prune(&class, &predicate)? {
                println!("{}", catalog.class_name(child));
            }
        }
    }
    Ok(())
}
