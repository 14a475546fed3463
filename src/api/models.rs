use std::{collections::HashMap, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Unverified,
    Verified,
    InProgress,
    Resolved,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 4] = [
        IssueStatus::Unverified,
        IssueStatus::Verified,
        IssueStatus::InProgress,
        IssueStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Unverified => "unverified",
            IssueStatus::Verified => "verified",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssueStatus::Unverified => "Unverified",
            IssueStatus::Verified => "Verified",
            IssueStatus::InProgress => "In progress",
            IssueStatus::Resolved => "Resolved",
        }
    }
}

impl Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl IssuePriority {
    pub const ALL: [IssuePriority; 4] = [
        IssuePriority::Low,
        IssuePriority::Medium,
        IssuePriority::High,
        IssuePriority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssuePriority::Low => "low",
            IssuePriority::Medium => "medium",
            IssuePriority::High => "high",
            IssuePriority::Critical => "critical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssuePriority::Low => "Low",
            IssuePriority::Medium => "Medium",
            IssuePriority::High => "High",
            IssuePriority::Critical => "Critical",
        }
    }
}

impl Display for IssuePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message or system event attached to an issue thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: IssueStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: IssuePriority,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `GET /api/issues/{id}`: the issue plus the first page of its thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub summary: IssueSummary,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub total_events: usize,
}

/// `GET /api/issues/{id}/messages`. `offset` and `returned` are echoed by the
/// server and are the only values the cursor advances from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesPage {
    #[serde(default)]
    pub events: Vec<Event>,
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    pub returned: usize,
    pub total_events: usize,
}

/// `GET /api/programs`. Issues point at a program through its `id`; the
/// `program_id` here is the program's own slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub program_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub owners: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Programs by id, in server order.
#[derive(Debug, Clone, Default)]
pub struct ProgramDirectory {
    programs: Vec<Program>,
    index: HashMap<String, usize>,
}

impl ProgramDirectory {
    pub fn new(programs: Vec<Program>) -> Self {
        let index = programs
            .iter()
            .enumerate()
            .map(|(i, program)| (program.id.clone(), i))
            .collect();
        Self { programs, index }
    }

    pub fn get(&self, id: &str) -> Option<&Program> {
        self.index.get(id).and_then(|&i| self.programs.get(i))
    }

    pub fn ids(&self) -> Vec<String> {
        self.programs.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Name of the program an issue belongs to. Unknown ids are shown as
    /// they are, a missing id as `-`.
    pub fn label(&self, id: Option<&str>) -> String {
        match id {
            None => "-".to_string(),
            Some(id) => match self.get(id) {
                Some(program) if !program.name.is_empty() => program.name.clone(),
                Some(program) if !program.program_id.is_empty() => program.program_id.clone(),
                _ => id.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusUpdate {
    pub status: IssueStatus,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PriorityUpdate {
    pub priority: IssuePriority,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn format_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
