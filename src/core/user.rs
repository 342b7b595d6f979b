//! Anonymous users, their interest tags, and wait-queue entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::{MAX_TAG_LENGTH, MAX_USER_ID_LENGTH, SYSTEM_SENDER};
use crate::error::{Result, StudyMateError};

/// A client-supplied, ephemeral identity with study-interest tags.
///
/// Tags keep their original casing for display; every comparison is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl User {
    pub fn new(id: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: id.into(),
            tags,
        }
    }

    /// Validate the id and clean the tag list.
    ///
    /// Tags are trimmed, empties and over-long ones dropped, duplicates
    /// (ignoring case) removed keeping the first spelling, and the list is
    /// capped at `max_tags`.
    pub fn sanitized(self, max_tags: usize) -> Result<Self> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(StudyMateError::ValidationError(
                "User id cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_USER_ID_LENGTH {
            return Err(StudyMateError::ValidationError(format!(
                "User id too long. Maximum {} characters allowed",
                MAX_USER_ID_LENGTH
            )));
        }
        // Ids are embedded in `:`-separated store keys
        if id.contains(':') {
            return Err(StudyMateError::ValidationError(
                "User id cannot contain ':'".to_string(),
            ));
        }
        if id.eq_ignore_ascii_case(SYSTEM_SENDER) {
            return Err(StudyMateError::ValidationError(format!(
                "User id '{}' is reserved",
                SYSTEM_SENDER
            )));
        }

        let mut seen = HashSet::new();
        let tags = self
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty() && tag.chars().count() <= MAX_TAG_LENGTH)
            .filter(|tag| seen.insert(tag.to_lowercase()))
            .take(max_tags)
            .collect();

        Ok(Self { id, tags })
    }

    /// Lowercased tag set used for scoring
    pub fn normalized_tags(&self) -> HashSet<String> {
        self.tags.iter().map(|tag| tag.to_lowercase()).collect()
    }
}

/// Tags present in both lists, compared case-insensitively.
///
/// Order and casing follow `first`; each tag appears once.
pub fn shared_tags(first: &[String], second: &[String]) -> Vec<String> {
    let other: HashSet<String> = second.iter().map(|tag| tag.to_lowercase()).collect();
    let mut seen = HashSet::new();

    first
        .iter()
        .filter(|tag| {
            let lowered = tag.to_lowercase();
            other.contains(&lowered) && seen.insert(lowered)
        })
        .cloned()
        .collect()
}

/// Number of distinct tags two users have in common
pub fn tag_overlap(a: &User, b: &User) -> usize {
    a.normalized_tags()
        .intersection(&b.normalized_tags())
        .count()
}

/// A user waiting to be paired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEntry {
    pub user: User,
    pub enqueued_at: DateTime<Utc>,
}

impl WaitEntry {
    pub fn new(user: User) -> Self {
        Self {
            user,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_reserved_and_key_breaking_ids_rejected() {
        for id in ["system", "System", "a:b"] {
            let err = User::new(id, tags(&["CS"])).sanitized(20).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "id {:?}", id);
        }
        assert!(User::new("systematic", tags(&["CS"])).sanitized(20).is_ok());
    }

    #[test]
    fn test_shared_tags_keeps_first_casing() {
        let shared = shared_tags(&tags(&["AI", "Math"]), &tags(&["ai", "bio"]));
        assert_eq!(shared, vec!["AI".to_string()]);
    }

    #[test]
    fn test_shared_tags_same_members_both_ways() {
        let a = tags(&["CS", "Math", "Physics"]);
        let b = tags(&["physics", "MATH", "art"]);

        let mut forward: Vec<String> = shared_tags(&a, &b).iter().map(|t| t.to_lowercase()).collect();
        let mut backward: Vec<String> = shared_tags(&b, &a).iter().map(|t| t.to_lowercase()).collect();
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
        assert_eq!(shared_tags(&a, &b), tags(&["Math", "Physics"]));
    }

    #[test]
    fn test_shared_tags_deduplicates() {
        let shared = shared_tags(&tags(&["Math", "math"]), &tags(&["MATH"]));
        assert_eq!(shared, tags(&["Math"]));
    }

    #[test]
    fn test_tag_overlap_is_case_insensitive() {
        let a = User::new("a", tags(&["CS", "Math"]));
        let b = User::new("b", tags(&["math", "cs", "bio"]));
        assert_eq!(tag_overlap(&a, &b), 2);
        assert_eq!(tag_overlap(&a, &User::new("c", tags(&["art"]))), 0);
    }

    #[test]
    fn test_sanitized_cleans_tags() {
        let user = User::new(" u1 ", tags(&[" Math ", "", "math", "CS"]))
            .sanitized(10)
            .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.tags, tags(&["Math", "CS"]));
    }

    #[test]
    fn test_sanitized_caps_tag_count() {
        let user = User::new("u1", tags(&["a", "b", "c", "d"])).sanitized(2).unwrap();
        assert_eq!(user.tags, tags(&["a", "b"]));
    }

    #[test]
    fn test_sanitized_rejects_empty_id() {
        assert!(User::new("   ", vec![]).sanitized(5).is_err());
    }
}
