//! Hierarchical addressing: paths, selectors and properties.
//!
//! Parsing here is pure and local. Wildcards in selectors are preserved
//! unevaluated and resolved by whoever answers the query.

pub mod path;
pub mod properties;
pub mod selector;

pub use path::{Path, FORBIDDEN_PATH_CHARS};
pub use properties::Properties;
pub use selector::Selector;
