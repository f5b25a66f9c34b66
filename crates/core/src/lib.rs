//! jobflow-core: catalog data model for the jobflow stage-progression
//! engine.
//!
//! A catalog describes one tenant's job lifecycle: the ordered stages a
//! job moves through, the questions asked within each stage, the
//! transition rules that fire on answers, and the task templates
//! instantiated when a stage is entered. Catalogs are loaded once from
//! JSON, validated, and treated as read-only at runtime.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`Catalog`] -- load with [`Catalog::load`], inspect with the ordered
//!   accessors
//! - [`Stage`], [`Question`], [`TransitionRule`], [`TaskTemplate`] --
//!   catalog rows
//! - [`Condition`] -- the tagged condition tree behind skip logic and
//!   conditional triggers
//! - [`CatalogError`], [`CatalogIssue`] -- load and validation failures

pub mod catalog;
pub mod condition;
pub mod error;
pub mod validate;

pub use catalog::{
    Catalog, Question, ResponseType, Stage, StageKind, TaskTemplate, TransitionRule, Trigger,
};
pub use condition::{CompareOp, Condition};
pub use error::CatalogError;
pub use validate::CatalogIssue;
