//! Authorization
//!
//! Role to permission mapping and the session snapshot used for checks.
//! Nothing here performs I/O.

pub mod context;
pub mod permissions;

pub use context::AccessContext;
pub use permissions::{role_grants, role_permissions};
