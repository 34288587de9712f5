//! Shuffler/Anonymizer.
//!
//! Assigns labels `A, B, C, ...` to a permutation of a prompt's answers so
//! that a judge never sees which vendor wrote which answer.
//!
//! Every call owns its generator. A seeded call builds a fresh `StdRng`
//! from the seed, so concurrent tasks never share random state and the same
//! seed always reproduces the same permutation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AnonymizedAnswer, Answer, Label, LabelMapping, MAX_LABELS, MIN_LABELS};

/// Errors from anonymization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnonymizeError {
    #[error("Cannot anonymize {count} answers: expected between {} and {}", MIN_LABELS, MAX_LABELS)]
    AnswerCount { count: usize },
}

/// A blind answer set and the mapping that un-blinds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anonymized {
    /// Answers in label order (`A` first)
    pub answers: Vec<AnonymizedAnswer>,

    pub mapping: LabelMapping,
}

/// Which task coordinates feed the per-task seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedScope {
    /// Seed from (run seed, prompt, judge): every task gets its own order
    #[default]
    Task,

    /// Seed from (run seed, prompt): all judges of a prompt see one order
    Prompt,

    /// The run seed unchanged for every task
    Global,
}

/// Shuffle `answers` and assign labels in alphabetical order.
///
/// With `seed`, the permutation depends only on the seed and the input
/// order. Without it, the thread-local entropy source is used.
pub fn anonymize(answers: &[Answer], seed: Option<u64>) -> Result<Anonymized, AnonymizeError> {
    if answers.len() < MIN_LABELS || answers.len() > MAX_LABELS {
        return Err(AnonymizeError::AnswerCount {
            count: answers.len(),
        });
    }

    let mut order: Vec<usize> = (0..answers.len()).collect();
    match seed {
        Some(seed) => order.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => order.shuffle(&mut rand::thread_rng()),
    }

    let mut anonymized = Vec::with_capacity(answers.len());
    let mut mapping = LabelMapping::new();

    for (position, &source) in order.iter().enumerate() {
        // MAX_LABELS <= 26
        let Some(label) = Label::nth(position) else {
            return Err(AnonymizeError::AnswerCount {
                count: answers.len(),
            });
        };
        let answer = &answers[source];
        anonymized.push(AnonymizedAnswer {
            label,
            text: answer.text.clone(),
        });
        mapping.insert(label, answer.answer_id.clone());
    }

    tracing::trace!(answers = answers.len(), seeded = seed.is_some(), "Anonymized answer set");

    Ok(Anonymized {
        answers: anonymized,
        mapping,
    })
}

/// Derive the seed for one (prompt, judge) task from the run seed.
///
/// FNV-1a over the run seed and the scoped identifiers, so the value is
/// stable across processes and toolchains.
pub fn derive_task_seed(run_seed: u64, prompt_id: &str, judge_id: &str, scope: SeedScope) -> u64 {
    match scope {
        SeedScope::Global => run_seed,
        SeedScope::Prompt => fnv1a(&[&run_seed.to_le_bytes(), prompt_id.as_bytes()]),
        SeedScope::Task => fnv1a(&[
            &run_seed.to_le_bytes(),
            prompt_id.as_bytes(),
            judge_id.as_bytes(),
        ]),
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(parts: &[&[u8]]) -> u64 {
    let mut hash = FNV_OFFSET;
    for part in parts {
        for byte in part.iter() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // Separator so ("ab", "c") and ("a", "bc") differ
        hash ^= 0xff;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
