use crate::graph::ReferenceGraph;
use crate::models::Category;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed updates pushed by the ingestion worker.
///
/// Wire form: `{"type": "setIssue", "payload": {...}}`. Keyed updates carry
/// `[id, value]` pairs as their payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum IngestEvent {
    SetRepos(Vec<Value>),
    SetRepo(Value),
    SetProjects(Vec<Value>),
    SetIssues(Vec<Value>),
    SetIssue(Value),
    SetPullRequests(Vec<Value>),
    SetPullRequest(Value),
    SetComparison(Value, Value),
    SetReferences(Value, Vec<Value>),
    SetActors(Value, Value),
    SetReviewers(Value, Value),
    SetCards(Value, Vec<Card>),
    SetGraphs(Vec<ReferenceGraph>),
}

impl IngestEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::SetRepos(_) => "setRepos",
            IngestEvent::SetRepo(_) => "setRepo",
            IngestEvent::SetProjects(_) => "setProjects",
            IngestEvent::SetIssues(_) => "setIssues",
            IngestEvent::SetIssue(_) => "setIssue",
            IngestEvent::SetPullRequests(_) => "setPullRequests",
            IngestEvent::SetPullRequest(_) => "setPullRequest",
            IngestEvent::SetComparison(..) => "setComparison",
            IngestEvent::SetReferences(..) => "setReferences",
            IngestEvent::SetActors(..) => "setActors",
            IngestEvent::SetReviewers(..) => "setReviewers",
            IngestEvent::SetCards(..) => "setCards",
            IngestEvent::SetGraphs(_) => "setGraphs",
        }
    }
}

/// A project column card as reported by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Value,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub content: Option<CardContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardContent {
    #[serde(default)]
    pub issue: Option<Value>,
    #[serde(default)]
    pub pull_request: Option<Value>,
}

/// Requests sent from the broker to the ingestion worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerCommand {
    /// Fetch this entity again and report it back.
    Refresh { category: Category, key: String },
    /// A webhook delivery to interpret.
    Hook {
        event: Option<String>,
        payload: Value,
    },
}

/// Result of applying one `IngestEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub version: crate::models::Version,
    pub applied: usize,
    pub rejected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_worker_wire_format() {
        let ev: IngestEvent = serde_json::from_value(json!({
            "type": "setReferences",
            "payload": ["1", [3, "4"]]
        }))
        .unwrap();
        assert_eq!(
            ev,
            IngestEvent::SetReferences(json!("1"), vec![json!(3), json!("4")])
        );

        let ev: IngestEvent = serde_json::from_value(json!({
            "type": "setCards",
            "payload": [10, [
                {"id": 1, "content": {"issue": {"id": 5}}},
                {"id": 2, "note": "todo"}
            ]]
        }))
        .unwrap();
        let IngestEvent::SetCards(column, cards) = ev else {
            panic!("expected setCards");
        };
        assert_eq!(column, json!(10));
        assert_eq!(cards[0].content.as_ref().unwrap().issue, Some(json!({"id": 5})));
        assert_eq!(cards[1].note.as_deref(), Some("todo"));
    }

    #[test]
    fn refresh_command_wire_format() {
        let cmd = WorkerCommand::Refresh {
            category: Category::ColumnCards,
            key: "12".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"type": "refresh", "category": "columnCards", "key": "12"})
        );
    }
}
