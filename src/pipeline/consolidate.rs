//! Hierarchical reduction of section syntheses until they fit one final call.
//!
//! Each round merges neighbouring sections in groups of two (three once more than six remain)
//! through the synthesis endpoint. The loop stops as soon as at most two sections remain within
//! the token threshold. A round ceiling bounds the work; reaching it, or being left with a single
//! section that is still too large, falls back to hard truncation.

use crate::completion::{CompletionClient, SynthesizeSectionRequest};
use crate::metrics::PipelineMetrics;

use super::settings::ConsolidationSettings;
use super::types::{CancellationFlag, Phase, PipelineError, ProgressEvent, ProgressObserver};

/// Appended to any text shortened before it is sent on.
pub const TRUNCATION_MARKER: &str = "\n[...truncated...]";

/// Rough token count of `sections` using a characters-per-token ratio.
pub fn estimate_tokens(sections: &[String], chars_per_token: usize) -> usize {
    let total_chars: usize = sections.iter().map(|section| section.chars().count()).sum();
    total_chars / chars_per_token.max(1)
}

/// Keep the first `max_chars` characters of `text`, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Result of the consolidation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationOutcome {
    /// Sections handed to the final call.
    pub sections: Vec<String>,
    /// Merge rounds performed.
    pub rounds: u32,
    /// Whether the truncation fallback was applied.
    pub forced_truncation: bool,
}

/// Runs merge rounds against the synthesis endpoint.
pub struct Consolidator<'a> {
    client: &'a dyn CompletionClient,
    settings: &'a ConsolidationSettings,
    metrics: &'a PipelineMetrics,
}

impl<'a> Consolidator<'a> {
    /// Borrow the collaborators for one run.
    pub fn new(
        client: &'a dyn CompletionClient,
        settings: &'a ConsolidationSettings,
        metrics: &'a PipelineMetrics,
    ) -> Self {
        Self {
            client,
            settings,
            metrics,
        }
    }

    /// Whether `sections` already satisfy the exit condition.
    pub fn fits(&self, sections: &[String]) -> bool {
        sections.len() <= 2
            && estimate_tokens(sections, self.settings.chars_per_token) <= self.settings.token_threshold
    }

    /// Perform one merge round. `round` is 1-based and only used for error reporting.
    pub async fn pre_consolidate(
        &self,
        sections: Vec<String>,
        round: u32,
        cancel: &CancellationFlag,
    ) -> Result<Vec<String>, PipelineError> {
        let group_size = if sections.len() > 6 { 3 } else { 2 };
        let total_groups = sections.len().div_ceil(group_size);
        let mut merged = Vec::with_capacity(total_groups);

        for (group_index, group) in sections.chunks(group_size).enumerate() {
            if let [single] = group {
                merged.push(single.clone());
                continue;
            }
            cancel.check()?;

            let request = SynthesizeSectionRequest {
                analyses: group
                    .iter()
                    .map(|text| truncate_with_marker(text, self.settings.group_truncate_chars))
                    .collect(),
                section_index: group_index,
                total_sections: total_groups,
            };
            let synthesis = self
                .client
                .synthesize_section(&request)
                .await
                .map_err(|source| PipelineError::Consolidation {
                    round,
                    group: group_index + 1,
                    source,
                })?;
            merged.push(synthesis);
        }

        tracing::info!(
            round,
            before = sections.len(),
            after = merged.len(),
            "Consolidation round complete"
        );
        Ok(merged)
    }

    /// Merge rounds until the sections fit, falling back to truncation at the round ceiling.
    pub async fn consolidate(
        &self,
        sections: Vec<String>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<ConsolidationOutcome, PipelineError> {
        let max_rounds = self.settings.max_rounds;
        let mut working = sections;
        let mut rounds = 0;

        loop {
            if self.fits(&working) {
                return Ok(ConsolidationOutcome {
                    sections: working,
                    rounds,
                    forced_truncation: false,
                });
            }
            if rounds >= max_rounds || working.len() <= 1 {
                break;
            }
            cancel.check()?;
            observer.on_progress(ProgressEvent::new(
                Phase::Consolidation,
                rounds as usize,
                max_rounds as usize,
                format!(
                    "Consolidation round {} ({} sections, ~{} tokens)",
                    rounds + 1,
                    working.len(),
                    estimate_tokens(&working, self.settings.chars_per_token)
                ),
            ));
            rounds += 1;
            working = self.pre_consolidate(working, rounds, cancel).await?;
        }

        tracing::warn!(
            rounds,
            sections = working.len(),
            estimated_tokens = estimate_tokens(&working, self.settings.chars_per_token),
            max_chars = self.settings.forced_truncate_chars,
            "Consolidation did not converge; truncating sections"
        );
        self.metrics.record_forced_truncation();
        let sections = working
            .iter()
            .map(|section| truncate_with_marker(section, self.settings.forced_truncate_chars))
            .collect();
        Ok(ConsolidationOutcome {
            sections,
            rounds,
            forced_truncation: true,
        })
    }
}
