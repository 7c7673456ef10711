//! Ordered retrieval strategies.
//!
//! A cascade is a list of [`Strategy`] values tried in order until the target
//! count is reached. Each step yields a tagged [`Retrieval`] and leaves a
//! [`StepTrace`] behind so callers and tests can see which tier produced what.

use crate::model::Prompt;
use crate::store::{PromptQuery, QuestionBank};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Found(Vec<Prompt>),
    Empty,
}

impl Retrieval {
    fn from_rows(rows: Vec<Prompt>) -> Self {
        if rows.is_empty() {
            Retrieval::Empty
        } else {
            Retrieval::Found(rows)
        }
    }

    pub fn into_prompts(self) -> Vec<Prompt> {
        match self {
            Retrieval::Found(rows) => rows,
            Retrieval::Empty => Vec::new(),
        }
    }
}

/// One tier of a cascade. The query's `exclude` and `limit` are filled in
/// when the strategy runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub label: String,
    pub query: PromptQuery,
}

impl Strategy {
    pub fn new(label: impl Into<String>, query: PromptQuery) -> Self {
        Self {
            label: label.into(),
            query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTrace {
    pub label: String,
    pub requested: usize,
    pub found: usize,
}

/// Runs a single query. A store fault is logged and, when the query carried
/// an eligibility filter, retried once without it; a second fault is empty.
pub async fn retrieve(bank: &dyn QuestionBank, label: &str, query: &PromptQuery) -> Retrieval {
    match bank.find_prompts(query).await {
        Ok(rows) => Retrieval::from_rows(rows),
        Err(e) if query.is_tiered() => {
            tracing::warn!("{}: retrieval failed ({}), retrying without tier filter", label, e);
            match bank.find_prompts(&query.without_tiers()).await {
                Ok(rows) => Retrieval::from_rows(rows),
                Err(e) => {
                    tracing::error!("{}: retry failed ({}), treating as empty", label, e);
                    Retrieval::Empty
                }
            }
        }
        Err(e) => {
            tracing::warn!("{}: retrieval failed ({}), treating as empty", label, e);
            Retrieval::Empty
        }
    }
}

/// Walks `strategies` until `target` prompts are collected. Every pick is
/// added to `used`, so later strategies and later cascades never repeat it.
pub async fn fill(
    bank: &dyn QuestionBank,
    strategies: &[Strategy],
    target: usize,
    used: &mut HashSet<String>,
) -> (Vec<Prompt>, Vec<StepTrace>) {
    let mut picks: Vec<Prompt> = Vec::with_capacity(target);
    let mut trace = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let requested = target.saturating_sub(picks.len());
        if requested == 0 {
            break;
        }
        let mut query = strategy.query.clone().excluding(used);
        query.limit = requested;

        let rows = retrieve(bank, &strategy.label, &query).await.into_prompts();
        let mut found = 0;
        for prompt in rows.into_iter().take(requested) {
            // Stores are trusted to honour `exclude`, but a duplicate must
            // never reach the sequence.
            if used.insert(prompt.question_id.clone()) {
                picks.push(prompt);
                found += 1;
            }
        }
        tracing::debug!(
            "{}: requested {}, found {}",
            strategy.label,
            requested,
            found
        );
        trace.push(StepTrace {
            label: strategy.label.clone(),
            requested,
            found,
        });
    }

    (picks, trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn bank(domain: &str, count: usize, difficulty: u8) -> Vec<Prompt> {
        (0..count)
            .map(|i| {
                let mut p = Prompt::new(format!("q_{domain}_{difficulty}_{i}"), domain, difficulty);
                p.career_target = vec!["student".into()];
                p.probability = 1.0 - i as f64 / 100.0;
                p
            })
            .collect()
    }

    #[tokio::test]
    async fn cascade_stops_once_target_is_met() {
        // Arrange
        let mut prompts = bank("finance", 4, 1);
        prompts.extend(bank("general", 10, 1));
        let store = MemoryStore::with_bank(prompts, vec![]);
        let strategies = vec![
            Strategy::new("finance", PromptQuery::new("finance", 0)),
            Strategy::new("general", PromptQuery::new("general", 0)),
            Strategy::new("never", PromptQuery::new("marketing", 0)),
        ];
        let mut used = HashSet::new();

        // Act
        let (picks, trace) = fill(&store, &strategies, 6, &mut used).await;

        // Assert
        assert_eq!(picks.len(), 6);
        assert_eq!(trace.len(), 2, "third strategy must not run");
        assert_eq!(trace[0], StepTrace { label: "finance".into(), requested: 6, found: 4 });
        assert_eq!(trace[1], StepTrace { label: "general".into(), requested: 2, found: 2 });
        assert_eq!(used.len(), 6);
    }

    #[tokio::test]
    async fn used_ids_are_excluded_across_strategies() {
        let store = MemoryStore::with_bank(bank("general", 3, 1), vec![]);
        let strategies = vec![
            Strategy::new("first", PromptQuery::new("general", 0)),
            Strategy::new("again", PromptQuery::new("general", 0)),
        ];
        let mut used: HashSet<String> = ["q_general_1_0".to_string()].into_iter().collect();

        let (picks, trace) = fill(&store, &strategies, 5, &mut used).await;

        assert_eq!(picks.len(), 2);
        assert!(picks.iter().all(|p| p.question_id != "q_general_1_0"));
        assert_eq!(trace[1].found, 0);
    }

    #[tokio::test]
    async fn tiered_fault_retries_without_filter() {
        let mut prompts = bank("general", 2, 1);
        prompts[0].career_target = vec!["exec".into()];
        let store = MemoryStore::with_bank(prompts, vec![]);
        store.fail_tiered_queries(true);
        let tiers = vec!["student".to_string()];
        let query = PromptQuery::new("general", 10).tiers(Some(&tiers));

        let result = retrieve(&store, "general d1", &query).await;

        // The retry ignores eligibility, so the exec-only prompt comes back too.
        assert_eq!(result.into_prompts().len(), 2);
    }

    #[tokio::test]
    async fn total_fault_is_empty_not_an_error() {
        let store = MemoryStore::with_bank(bank("general", 2, 1), vec![]);
        store.fail_all_queries(true);
        let tiers = vec!["student".to_string()];
        let query = PromptQuery::new("general", 10).tiers(Some(&tiers));

        assert_eq!(retrieve(&store, "general d1", &query).await, Retrieval::Empty);
    }
}
