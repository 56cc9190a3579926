//! Entity status log: append-only history of status transitions (spec §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_type", rename_all = "lowercase")]
pub enum EntityType {
    Transfer,
    Account,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityStatusLogEntry {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub previous_status: String,
    pub status: String,
    pub reason: Option<String>,
    pub at: Timestamp,
}
