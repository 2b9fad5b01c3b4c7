//! Ownership rows and auto-share rules

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectType {
    Scan,
    Image,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Scan => "scan",
            ObjectType::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    pub object_id: String,
    pub object_type: ObjectType,
    pub creator_id: String,
    pub created_at_unix_sec: i64,
    pub modified_at_unix_sec: i64,
    pub viewer_group_ids: Vec<String>,
    pub editor_group_ids: Vec<String>,
}

impl Ownership {
    /// Carry creator and creation time over from an existing row
    pub fn merge_existing(mut self, existing: Option<&Ownership>) -> Self {
        if let Some(prev) = existing {
            self.created_at_unix_sec = prev.created_at_unix_sec;
            if !prev.creator_id.is_empty() {
                self.creator_id = prev.creator_id.clone();
            }
        }
        self
    }
}

/// Groups granted access to every scan imported for one creator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoShareRule {
    pub id: String,
    pub viewer_group_ids: Vec<String>,
    pub editor_group_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(creator: &str, created: i64, modified: i64) -> Ownership {
        Ownership {
            object_id: "048300551".to_string(),
            object_type: ObjectType::Scan,
            creator_id: creator.to_string(),
            created_at_unix_sec: created,
            modified_at_unix_sec: modified,
            viewer_group_ids: vec![],
            editor_group_ids: vec![],
        }
    }

    #[test]
    fn test_merge_preserves_creator_and_created_at() {
        let prev = row("alice", 100, 100);
        let merged = row("importer", 200, 200).merge_existing(Some(&prev));
        assert_eq!(merged.creator_id, "alice");
        assert_eq!(merged.created_at_unix_sec, 100);
        assert_eq!(merged.modified_at_unix_sec, 200);
    }

    #[test]
    fn test_merge_without_existing_is_unchanged() {
        let fresh = row("importer", 200, 200);
        assert_eq!(fresh.clone().merge_existing(None), fresh);
    }
}
