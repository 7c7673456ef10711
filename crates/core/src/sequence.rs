//! Incremental consumption of a built pack during a live session.

use crate::model::Prompt;
use crate::pack::difficulty_cascade;
use crate::settings::EngineSettings;
use std::collections::{HashSet, VecDeque};

const PROMOTE_AT: u32 = 65;
const DEMOTE_BELOW: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// General warm-up, then domain prompts adapting to answer scores.
    Adaptive,
    /// Pack order, untouched. Used for case studies.
    Sequential,
}

#[derive(Debug, Clone)]
pub struct PromptCursor {
    mode: CursorMode,
    first: Option<Prompt>,
    general: VecDeque<Prompt>,
    domain: [VecDeque<Prompt>; 3],
    sequential: VecDeque<Prompt>,
    handed_out: HashSet<String>,
    asked: usize,
    general_asked: usize,
    difficulty: u8,
    max_general: usize,
    max_domain: usize,
    max_total: usize,
}

impl PromptCursor {
    pub fn adaptive(prompts: Vec<Prompt>, settings: &EngineSettings) -> Self {
        let mut iter = prompts.into_iter();
        let first = iter.next();
        let mut general = Vec::new();
        let mut domain: [VecDeque<Prompt>; 3] = Default::default();
        for prompt in iter {
            if prompt.is_general() {
                general.push(prompt);
            } else {
                domain[usize::from(prompt.level() - 1)].push_back(prompt);
            }
        }
        general.sort_by_key(Prompt::level);

        Self {
            mode: CursorMode::Adaptive,
            first,
            general: general.into(),
            domain,
            sequential: VecDeque::new(),
            handed_out: HashSet::new(),
            asked: 0,
            general_asked: 0,
            difficulty: 1,
            max_general: settings.max_general_prompts,
            max_domain: settings.max_domain_prompts,
            max_total: settings.max_total_prompts,
        }
    }

    pub fn sequential(prompts: Vec<Prompt>) -> Self {
        Self {
            mode: CursorMode::Sequential,
            first: None,
            general: VecDeque::new(),
            domain: Default::default(),
            sequential: prompts.into(),
            handed_out: HashSet::new(),
            asked: 0,
            general_asked: 0,
            difficulty: 1,
            max_general: 0,
            max_domain: 0,
            max_total: usize::MAX,
        }
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn asked(&self) -> usize {
        self.asked
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn remaining(&self) -> usize {
        let pooled = self.general.len()
            + self.domain.iter().map(VecDeque::len).sum::<usize>()
            + self.sequential.len()
            + usize::from(self.first.is_some());
        pooled.min(self.max_total.saturating_sub(self.asked))
    }

    /// Hands out the next prompt; `None` once the session has nothing left.
    pub fn next_prompt(&mut self) -> Option<Prompt> {
        if self.asked >= self.max_total {
            return None;
        }
        let next = match self.mode {
            CursorMode::Sequential => Self::pop_fresh(&mut self.sequential, &self.handed_out),
            CursorMode::Adaptive => self.next_adaptive(),
        }?;
        self.handed_out.insert(next.question_id.clone());
        self.asked += 1;
        if next.is_general() {
            self.general_asked += 1;
        }
        Some(next)
    }

    fn next_adaptive(&mut self) -> Option<Prompt> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        if self.general_asked < self.max_general {
            if let Some(p) = Self::pop_fresh(&mut self.general, &self.handed_out) {
                return Some(p);
            }
        }
        let domain_asked = self.asked - self.general_asked;
        if domain_asked < self.max_domain {
            for level in difficulty_cascade(self.difficulty) {
                let pool = &mut self.domain[usize::from(level - 1)];
                if let Some(p) = Self::pop_fresh(pool, &self.handed_out) {
                    return Some(p);
                }
            }
        }
        // Domain pools exhausted or capped: fall back to leftover general prompts.
        Self::pop_fresh(&mut self.general, &self.handed_out)
    }

    fn pop_fresh(pool: &mut VecDeque<Prompt>, handed_out: &HashSet<String>) -> Option<Prompt> {
        while let Some(p) = pool.pop_front() {
            if !handed_out.contains(&p.question_id) {
                return Some(p);
            }
        }
        None
    }

    /// Feeds an answer score back. Only domain prompts answered after the
    /// general warm-up move the difficulty.
    pub fn record_score(&mut self, prompt: &Prompt, score: u32) {
        if self.mode != CursorMode::Adaptive
            || prompt.is_general()
            || self.general_asked < self.max_general
        {
            return;
        }
        let before = self.difficulty;
        if score >= PROMOTE_AT {
            self.difficulty = (self.difficulty + 1).min(3);
        } else if score < DEMOTE_BELOW {
            self.difficulty = self.difficulty.saturating_sub(1).max(1);
        }
        tracing::debug!(
            "score {} on {}: difficulty {} -> {}",
            score,
            prompt.question_id,
            before,
            self.difficulty
        );
    }
}
