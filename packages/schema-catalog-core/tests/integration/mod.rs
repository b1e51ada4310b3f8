//! Integration tests for the schema catalog.
//!
//! Sections:
//! 1. Class hierarchies and template commits
//! 2. Constraints and shared indexes
//! 3. Partitioning and pruning
//! 4. Catalog persistence

pub mod constraint_tests;
pub mod helpers;
pub mod hierarchy_tests;
pub mod partition_tests;
pub mod persistence_tests;
