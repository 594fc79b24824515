use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::deserialize_id;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(alias = "type")]
    pub notification_type: Option<String>,
    pub is_read: bool,
    pub data: Value,
    pub created_at: Option<String>,
}

/// Number of unread notifications in a list
pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.is_read).count()
}
