//! User entity. Authentication and sessions live outside the engine;
//! this record only anchors ownership and notification routing.

use serde::{Deserialize, Serialize};

use crate::types::Id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub display_name: String,
    pub created_at: i64,
}
