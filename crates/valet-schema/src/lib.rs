//! Declarative command catalog for the valet bot framework.
//!
//! Commands, their syntaxes, and parameter types are pure data
//! ([`catalog`]); handler callables are code, registered against that
//! data at boot through the [`loader`]. The loader validates the whole
//! catalog once and then presents an immutable view to the rest of the
//! pipeline. [`help`] renders user-facing command listings from the same
//! data.

pub mod builtin;
pub mod catalog;
pub mod help;
pub mod loader;

pub use catalog::{
    CommandDef, ParameterDef, Scope, ScopeDef, ServiceDef, SettingDef, StorageDef, Syntax,
    TypeCatalog, TypeDef,
};
pub use loader::{LoaderBuilder, ServiceLoader, ServiceRegistration};
