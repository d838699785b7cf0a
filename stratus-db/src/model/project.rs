use chrono::{DateTime, Utc};

/// Parent of every other resource. `id` is the user-facing project id;
/// `number` the synthetic numeric id some APIs echo back.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub number: i64,
    pub created_at: DateTime<Utc>,
}
