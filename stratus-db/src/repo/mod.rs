//! Typed repositories, one module per entity family.
//!
//! Every function takes `&mut SqliteConnection` so callers decide the
//! transaction boundary: pass `&mut *tx` to compose several calls into one
//! atomic unit, or a pooled connection for single reads.

pub mod accounts;
pub mod buckets;
pub mod firewalls;
pub mod instances;
pub mod networks;
pub mod objects;
pub mod policies;
pub mod projects;
pub mod roles;
pub mod sessions;
