//! Question generation.
//!
//! One low-temperature LLM call returning an ordered list of ranked
//! questions. Ranks are re-normalized to a contiguous 1..N and bucketed into
//! difficulty levels by thirds.

use crate::prompts;
use crate::Result;
use dagprobe_core::{Dataset, DifficultyLevel, Metadata, Question};
use llm::{ChatRequest, LlmRunner};
use serde::Deserialize;
use tracing::info;

/// Default number of questions per run.
pub const DEFAULT_NUM_QUESTIONS: usize = 10;

#[derive(Debug, Deserialize)]
struct QuestionsPayload {
    #[serde(default)]
    questions: Vec<QuestionPayload>,
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    difficulty_rank: Option<u32>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    relevant_data_keys: Vec<String>,
}

/// Generates the run's ranked question set.
#[derive(Clone)]
pub struct QuestionGenerator {
    runner: LlmRunner,
    temperature: f32,
}

impl QuestionGenerator {
    pub fn new(runner: LlmRunner) -> Self {
        Self {
            runner,
            temperature: 0.3,
        }
    }

    /// One LLM call producing `num_questions` questions sorted by ascending
    /// difficulty rank. Transport and parse failures propagate to the caller:
    /// without questions there is no run.
    pub async fn generate(
        &self,
        dataset: &Dataset,
        metadata: &Metadata,
        num_questions: usize,
    ) -> Result<Vec<Question>> {
        let (system, user) = prompts::question_generation(metadata, dataset, num_questions);
        let request = ChatRequest::new(user)
            .with_system(system)
            .with_temperature(self.temperature);

        let payload: QuestionsPayload = self
            .runner
            .call_json("question_generation", &request)
            .await?;

        let questions = normalize(payload.questions, num_questions);
        info!(count = questions.len(), "questions generated");
        Ok(questions)
    }
}

/// Sort by the model's ranks, truncate to the requested count, then assign
/// contiguous ranks and bucket difficulty by thirds.
fn normalize(mut raw: Vec<QuestionPayload>, num_questions: usize) -> Vec<Question> {
    raw.sort_by_key(|q| q.difficulty_rank.unwrap_or(u32::MAX));
    raw.truncate(num_questions);

    let total = raw.len();
    raw.into_iter()
        .enumerate()
        .map(|(index, q)| {
            let rank = index as u32 + 1;
            Question {
                id: q.id.filter(|id| !id.is_empty()).unwrap_or_else(|| format!("q{rank}")),
                text: q.text,
                difficulty_rank: rank,
                difficulty_level: bucket(rank, total),
                reasoning: q.reasoning,
                relevant_data_keys: q.relevant_data_keys,
            }
        })
        .collect()
}

/// Rank 1..N/3 is easy, the top third is hard, the middle is medium.
fn bucket(rank: u32, total: usize) -> DifficultyLevel {
    let total = total as u32;
    let third = (total / 3).max(1);
    if rank <= third {
        DifficultyLevel::Easy
    } else if rank > total.saturating_sub(third) {
        DifficultyLevel::Hard
    } else {
        DifficultyLevel::Medium
    }
}
