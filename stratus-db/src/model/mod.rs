//! Row types for every persisted entity, grouped by API family.

mod compute;
mod iam;
mod project;
mod storage;

pub use compute::{
    FirewallPermission, FirewallRow, InstanceRow, InstanceState, NetworkRow, OperationRow,
    OperationStatus, RouteRow, SubnetRow,
};
pub use iam::{IamBinding, PolicyRow, RoleRow, ServiceAccountKeyRow, ServiceAccountRow};
pub use project::ProjectRow;
pub use storage::{
    BucketRow, LifecycleAction, LifecycleCondition, LifecycleRule, ObjectRow, ResumableSessionRow,
    SignedUrlRow, VersionRow,
};
