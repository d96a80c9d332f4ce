use std::collections::HashMap;

use thiserror::Error;

use crate::engine::types::{AnswerEntry, OptionId, Question, QuestionRefId, SubmissionPayload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("unknown question {0}")]
    UnknownQuestion(QuestionRefId),
    #[error("option {option} does not belong to question {question}")]
    UnknownOption { question: QuestionRefId, option: OptionId },
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    question_ref_id: QuestionRefId,
    allowed: Vec<OptionId>,
    selected: Option<OptionId>,
}

/// Selected option per question, in question order.
///
/// Entries are created empty and can only be set or reassigned; the ledger never
/// shrinks. Status gating is the caller's job.
#[derive(Debug, Clone)]
pub struct AnswerLedger {
    entries: Vec<LedgerEntry>,
    index: HashMap<QuestionRefId, usize>,
}

impl AnswerLedger {
    pub fn new(questions: &[Question]) -> Self {
        let mut entries = Vec::with_capacity(questions.len());
        let mut index = HashMap::with_capacity(questions.len());
        for question in questions {
            if index.contains_key(&question.question_ref_id) {
                tracing::warn!(
                    question_ref_id = %question.question_ref_id,
                    "Duplicate question in exam; keeping the first occurrence"
                );
                continue;
            }
            index.insert(question.question_ref_id.clone(), entries.len());
            entries.push(LedgerEntry {
                question_ref_id: question.question_ref_id.clone(),
                allowed: question.option_list.iter().map(|o| o.option_id.clone()).collect(),
                selected: None,
            });
        }
        Self { entries, index }
    }

    /// Returns the previously selected option, if any.
    pub fn set_answer(
        &mut self,
        question_ref_id: &QuestionRefId,
        option_id: OptionId,
    ) -> Result<Option<OptionId>, LedgerError> {
        let position = *self
            .index
            .get(question_ref_id)
            .ok_or_else(|| LedgerError::UnknownQuestion(question_ref_id.clone()))?;
        let entry = &mut self.entries[position];

        if !entry.allowed.is_empty() && !entry.allowed.contains(&option_id) {
            return Err(LedgerError::UnknownOption {
                question: question_ref_id.clone(),
                option: option_id,
            });
        }

        Ok(entry.selected.replace(option_id))
    }

    pub fn answer(&self, question_ref_id: &QuestionRefId) -> Option<&OptionId> {
        self.index.get(question_ref_id).and_then(|&i| self.entries[i].selected.as_ref())
    }

    pub fn answered_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.selected.is_some()).count()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn unanswered_count(&self) -> usize {
        self.total() - self.answered_count()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|entry| entry.selected.is_some())
    }

    /// Sparse payload: unanswered questions are left out, not sent as null.
    pub fn to_payload(&self) -> SubmissionPayload {
        let answers = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry.selected.as_ref().map(|option_id| AnswerEntry {
                    question_ref_id: entry.question_ref_id.clone(),
                    option_id: option_id.clone(),
                })
            })
            .collect();
        SubmissionPayload { answers, cheating_detected: None }
    }
}
