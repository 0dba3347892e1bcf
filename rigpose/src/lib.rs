//! Hierarchical rig transform cache with pose storage relinking.
//!
//! A [`RigHierarchy`] stores local and global transforms for every element in an initial and a
//! current state and lazily converts between the two spaces. A [`PoseAdapter`] can redirect
//! the storage of mapped bones into flat pose arrays for bulk transfer; [`PoseMapping`] is the
//! name/index based fallback. [`RigEvaluator`] ties both to an external pose under one lock.

#![forbid(unsafe_code)]

mod config;
mod error;
mod ids;
mod math;
mod model;
mod runtime;

#[cfg(feature = "json")]
pub mod json;

pub use config::*;
pub use error::*;
pub use math::*;
pub use model::*;
pub use runtime::*;


#[cfg(all(test, feature = "json"))]
mod json_tests;
