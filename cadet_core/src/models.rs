use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monotonic freshness token. Incremented once per committed store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// The version a freshly created store reports.
    pub const INITIAL: Version = Version(1);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity categories a client can ask to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "repo")]
    Repo,
    #[serde(rename = "project")]
    Project,
    #[serde(rename = "issue")]
    Issue,
    #[serde(rename = "pr")]
    Pr,
    #[serde(rename = "columnCards")]
    ColumnCards,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Repo => "repo",
            Category::Project => "project",
            Category::Issue => "issue",
            Category::Pr => "pr",
            Category::ColumnCards => "columnCards",
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Category::Repo => Table::Repos,
            Category::Project => Table::Projects,
            Category::Issue => Table::Issues,
            Category::Pr => Table::Prs,
            Category::ColumnCards => Table::ColumnCards,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "repo" => Ok(Category::Repo),
            "project" => Ok(Category::Project),
            "issue" => Ok(Category::Issue),
            "pr" => Ok(Category::Pr),
            "columnCards" => Ok(Category::ColumnCards),
            other => Err(Error::UnknownCategory(other.to_string())),
        }
    }
}

/// Every table held by the store. Serialized names match the JSON bodies of
/// `/data` and `/cards`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Table {
    Repos,
    Comparisons,
    Projects,
    ColumnCards,
    Issues,
    Prs,
    Actors,
    Reviewers,
    References,
}

/// Tables served by `/data` and delivered to long-poll waiters.
pub const DATA_TABLES: [Table; 4] = [
    Table::Repos,
    Table::Comparisons,
    Table::Projects,
    Table::ColumnCards,
];

/// Tables served by `/cards`.
pub const CARD_TABLES: [Table; 4] = [Table::Issues, Table::Prs, Table::Actors, Table::Reviewers];

/// Lookup keys for one record: the primary id plus an optional human-readable alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKeys {
    pub id: String,
    pub alias: Option<String>,
}

impl EntityKeys {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: None,
        }
    }

    /// Derive the keys of an entity record.
    ///
    /// Repos are aliased by `owner/name` and projects by `name`. A record
    /// without every required field is rejected as a whole.
    pub fn for_record(category: Category, record: &serde_json::Value) -> Result<Self> {
        let id = record
            .get("id")
            .and_then(key_string)
            .ok_or_else(|| Error::missing_key(category.as_str(), "id"))?;

        let alias = match category {
            Category::Repo => {
                let owner = non_empty_str(record, "owner")
                    .ok_or_else(|| Error::missing_key("repo", "owner"))?;
                let name = non_empty_str(record, "name")
                    .ok_or_else(|| Error::missing_key("repo", "name"))?;
                Some(format!("{owner}/{name}"))
            }
            Category::Project => Some(
                non_empty_str(record, "name")
                    .ok_or_else(|| Error::missing_key("project", "name"))?
                    .to_string(),
            ),
            Category::Issue | Category::Pr | Category::ColumnCards => None,
        };

        Ok(Self { id, alias })
    }
}

/// Normalize a JSON id (string or number) into a table key.
pub fn key_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str<'a>(record: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repo_keys_include_owner_name_alias() {
        let keys =
            EntityKeys::for_record(Category::Repo, &json!({"id": 42, "owner": "org", "name": "name"}))
                .unwrap();
        assert_eq!(keys.id, "42");
        assert_eq!(keys.alias.as_deref(), Some("org/name"));
    }

    #[test]
    fn records_missing_identifying_keys_are_rejected() {
        let err = EntityKeys::for_record(Category::Repo, &json!({"id": 42, "name": "name"}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingKey {
                category: "repo",
                field: "owner"
            }
        ));
        assert!(EntityKeys::for_record(Category::Issue, &json!({"number": 3})).is_err());
        assert!(EntityKeys::for_record(Category::Project, &json!({"id": "p1"})).is_err());
    }

    #[test]
    fn category_parses_query_names() {
        assert_eq!("columnCards".parse::<Category>().unwrap(), Category::ColumnCards);
        assert!(matches!(
            "comparison".parse::<Category>(),
            Err(Error::UnknownCategory(_))
        ));
    }

    #[test]
    fn table_names_serialize_camel_case() {
        assert_eq!(
            serde_json::to_value(Table::ColumnCards).unwrap(),
            json!("columnCards")
        );
    }
}
