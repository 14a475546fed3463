use std::collections::BTreeSet;

use crate::api::models::{IssuePriority, IssueStatus, IssueSummary, ProgramDirectory};

/// Client-side visibility filter over the loaded issue list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub query: String,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    /// Program id, as carried by the issues.
    pub program: Option<String>,
    pub source: Option<String>,
}

impl IssueFilter {
    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty()
            && self.status.is_none()
            && self.priority.is_none()
            && self.program.is_none()
            && self.source.is_none()
    }

    pub fn matches(&self, issue: &IssueSummary) -> bool {
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != issue.priority) {
            return false;
        }
        if self
            .program
            .as_deref()
            .is_some_and(|p| issue.program_id.as_deref() != Some(p))
        {
            return false;
        }
        if self
            .source
            .as_deref()
            .is_some_and(|s| issue.source.as_deref() != Some(s))
        {
            return false;
        }
        let query = self.query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [&issue.title, &issue.description, &issue.id]
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
    }

    /// Indices into `issues` that pass the filter, in list order.
    pub fn visible(&self, issues: &[IssueSummary]) -> Vec<usize> {
        issues
            .iter()
            .enumerate()
            .filter(|(_, issue)| self.matches(issue))
            .map(|(i, _)| i)
            .collect()
    }

    /// any -> unverified -> ... -> resolved -> any
    pub fn cycle_status(&mut self) {
        self.status = cycle(self.status, &IssueStatus::ALL);
    }

    pub fn cycle_priority(&mut self) {
        self.priority = cycle(self.priority, &IssuePriority::ALL);
    }

    pub fn cycle_program(&mut self, programs: &ProgramDirectory) {
        self.program = cycle(self.program.take(), &programs.ids());
    }

    /// Cycles through the sources present in `issues`, in name order.
    pub fn cycle_source(&mut self, issues: &[IssueSummary]) {
        let sources: Vec<String> = issues
            .iter()
            .filter_map(|issue| issue.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.source = cycle(self.source.take(), &sources);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn describe(&self, programs: &ProgramDirectory) -> String {
        format!(
            "Status: {}  Priority: {}  Program: {}  Source: {}",
            self.status.map_or("any", |s| s.label()),
            self.priority.map_or("any", |p| p.label()),
            match &self.program {
                Some(id) => programs.label(Some(id)),
                None => "any".to_string(),
            },
            self.source.as_deref().unwrap_or("any"),
        )
    }
}

fn cycle<T: Clone + PartialEq>(current: Option<T>, all: &[T]) -> Option<T> {
    match current {
        None => all.first().cloned(),
        Some(value) => {
            let idx = all.iter().position(|v| *v == value)?;
            all.get(idx + 1).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(
        id: &str,
        title: &str,
        status: IssueStatus,
        priority: IssuePriority,
        program: Option<&str>,
        source: &str,
    ) -> IssueSummary {
        IssueSummary {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status,
            priority,
            source: Some(source.into()),
            program_id: program.map(str::to_string),
            created_at: None,
            updated_at: None,
        }
    }

    fn sample() -> Vec<IssueSummary> {
        vec![
            issue(
                "a1",
                "Login broken",
                IssueStatus::Verified,
                IssuePriority::High,
                Some("p1"),
                "slack",
            ),
            issue(
                "b2",
                "Slow dashboard",
                IssueStatus::Resolved,
                IssuePriority::Low,
                None,
                "email",
            ),
            issue(
                "c3",
                "Login timeout",
                IssueStatus::Resolved,
                IssuePriority::High,
                Some("p2"),
                "slack",
            ),
        ]
    }

    #[test]
    fn empty_filter_shows_everything() {
        let filter = IssueFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.visible(&sample()), vec![0, 1, 2]);
    }

    #[test]
    fn combines_query_status_and_priority() {
        let mut filter = IssueFilter {
            query: "LOGIN".into(),
            ..Default::default()
        };
        assert_eq!(filter.visible(&sample()), vec![0, 2]);
        filter.status = Some(IssueStatus::Resolved);
        assert_eq!(filter.visible(&sample()), vec![2]);
        filter.priority = Some(IssuePriority::Low);
        assert!(filter.visible(&sample()).is_empty());
    }

    #[test]
    fn cycling_wraps_back_to_any() {
        let mut filter = IssueFilter::default();
        for expected in IssueStatus::ALL {
            filter.cycle_status();
            assert_eq!(filter.status, Some(expected));
        }
        filter.cycle_status();
        assert_eq!(filter.status, None);
        assert_eq!(
            filter.describe(&ProgramDirectory::default()),
            "Status: any  Priority: any  Program: any  Source: any"
        );
    }

    fn directory() -> ProgramDirectory {
        let program = |id: &str, name: &str| crate::api::models::Program {
            id: id.into(),
            program_id: name.to_lowercase(),
            name: name.into(),
            description: None,
            owners: Vec::new(),
            channels: Vec::new(),
            created_at: None,
            updated_at: None,
        };
        ProgramDirectory::new(vec![program("p1", "Payments"), program("p2", "Search")])
    }

    #[test]
    fn narrows_by_program_and_source() {
        let programs = directory();
        let mut filter = IssueFilter::default();
        filter.cycle_program(&programs);
        assert_eq!(filter.program.as_deref(), Some("p1"));
        assert_eq!(filter.visible(&sample()), vec![0]);
        assert!(filter.describe(&programs).contains("Program: Payments"));

        filter.cycle_program(&programs);
        assert_eq!(filter.visible(&sample()), vec![2]);
        filter.cycle_program(&programs);
        assert_eq!(filter.program, None);

        filter.cycle_source(&sample());
        assert_eq!(filter.source.as_deref(), Some("email"));
        assert_eq!(filter.visible(&sample()), vec![1]);
        filter.cycle_source(&sample());
        assert_eq!(filter.visible(&sample()), vec![0, 2]);
        assert!(!filter.is_empty());
        filter.cycle_source(&sample());
        assert!(filter.is_empty());
    }
}
