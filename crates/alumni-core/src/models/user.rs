use serde::{Deserialize, Serialize};

/// Page size used by the directory listing.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub graduation_year: i32,
    pub class_letter: String,
    #[serde(default)]
    pub message_to_graduates: String,
    #[serde(default)]
    pub message_to_students: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl User {
    /// Graduating class, e.g. "2010A".
    pub fn class_label(&self) -> String {
        format!("{}{}", self.graduation_year, self.class_letter)
    }

    pub fn status_display(&self) -> &str {
        self.status.as_deref().unwrap_or("-")
    }
}

/// Partial profile update; only fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graduation_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_letter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_to_graduates: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_to_students: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl UpdateUser {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Filters for `GET /users/lazy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersQuery {
    pub limit: u32,
    pub offset: u32,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub full_name: String,
    pub class_letters: Vec<String>,
}

impl Default for UsersQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            year_from: None,
            year_to: None,
            full_name: String::new(),
            class_letters: Vec::new(),
        }
    }
}

impl UsersQuery {
    /// Move to a 1-based page.
    pub fn page(mut self, page: u32) -> Self {
        self.offset = self.limit.saturating_mul(page.saturating_sub(1));
        self
    }

    /// Query pairs in the order the server expects. Unset filters are sent
    /// as empty values; each class letter gets its own `classLetter` pair.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let optional = |v: Option<i32>| v.map(|n| n.to_string()).unwrap_or_default();

        let mut pairs = vec![
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
            ("yearFrom".to_string(), optional(self.year_from)),
            ("yearTo".to_string(), optional(self.year_to)),
            ("fullName".to_string(), self.full_name.clone()),
        ];
        pairs.extend(
            self.class_letters
                .iter()
                .map(|letter| ("classLetter".to_string(), letter.clone())),
        );
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersPage {
    pub users: Vec<User>,
    pub total: u64,
}

impl UsersPage {
    pub fn page_count(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let json = r#"{"id": 1, "fullName": "Ivan Petrov", "email": "ivan@example.com", "graduationYear": 2010, "classLetter": "A", "occupation": "Engineer"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.full_name, "Ivan Petrov");
        assert_eq!(user.class_label(), "2010A");
        assert_eq!(user.message_to_students, "");
        assert_eq!(user.status_display(), "-");
    }

    #[test]
    fn test_update_user_skips_unset_fields() {
        let update = UpdateUser {
            occupation: Some("Teacher".to_string()),
            graduation_year: Some(2011),
            ..UpdateUser::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"occupation": "Teacher", "graduationYear": 2011})
        );
        assert!(!update.is_empty());
        assert!(UpdateUser::default().is_empty());
    }

    #[test]
    fn test_query_pairs() {
        let query = UsersQuery {
            year_from: Some(2005),
            full_name: "Petrov".to_string(),
            class_letters: vec!["A".to_string(), "B".to_string()],
            ..UsersQuery::default()
        }
        .page(3);

        let pairs = query.to_pairs();
        let as_str: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            as_str,
            vec![
                ("limit", "20"),
                ("offset", "40"),
                ("yearFrom", "2005"),
                ("yearTo", ""),
                ("fullName", "Petrov"),
                ("classLetter", "A"),
                ("classLetter", "B"),
            ]
        );
    }

    #[test]
    fn test_page_zero_is_first_page() {
        assert_eq!(UsersQuery::default().page(0).offset, 0);
        assert_eq!(UsersQuery::default().page(1).offset, 0);
    }

    #[test]
    fn test_huge_page_saturates_offset() {
        assert_eq!(UsersQuery::default().page(u32::MAX).offset, u32::MAX);
    }

    #[test]
    fn test_page_count() {
        let page = UsersPage {
            users: Vec::new(),
            total: 41,
        };
        assert_eq!(page.page_count(20), 3);
        assert_eq!(page.page_count(0), 0);
    }
}
