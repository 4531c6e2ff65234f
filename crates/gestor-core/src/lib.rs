//! Gestor Core — permission families, effective-permission resolution
//! and the assignment rules that keep the family graph consistent.
//!
//! Persistence is abstracted behind the traits in [`repository`]; the
//! SurrealDB implementations live in `gestor-db`.

pub mod assignment;
pub mod cycle;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod models;
pub mod repository;
pub mod resolver;

pub use assignment::AssignmentService;
pub use cycle::CycleValidator;
pub use error::{GestorError, GestorResult, IntegrityViolation};
pub use graph::FamilyGraph;
pub use hierarchy::{FamilyHierarchy, FamilyTreeNode};
pub use resolver::EffectivePermissionResolver;
