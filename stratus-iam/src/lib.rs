//! # Stratus IAM
//!
//! The identity control plane: service accounts and their keys, IAM
//! policies with optimistic-concurrency etags, and predefined plus custom
//! roles.
//!
//! Keys are deliberately mock material; the blob has the exact shape of a
//! downloadable credentials file but the private key inside is synthetic.
//! Policies are stored and returned verbatim; nothing in the emulator
//! gates storage or compute operations on them.

mod accounts;
mod policies;
mod roles;

pub use accounts::CreateServiceAccountRequest;
pub use policies::{DEFAULT_ETAG, SetPolicyRequest};
pub use roles::{CustomRoleRequest, seed_predefined_roles};

use stratus_db::Database;

/// The identity service. Cheap to clone.
#[derive(Clone)]
pub struct IamService {
    db: Database,
}

impl IamService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
