//! Groups chunk analyses into contiguous sections and synthesizes each one.

use crate::completion::{CompletionClient, SynthesizeSectionRequest};

use super::settings::SynthesisSettings;
use super::types::{CancellationFlag, Phase, PipelineError, ProgressEvent, ProgressObserver};

/// Split `analyses` into at most `section_count` contiguous groups of `ceil(n / section_count)`.
pub fn group_into_sections(analyses: &[String], section_count: usize) -> Vec<Vec<String>> {
    if analyses.is_empty() {
        return Vec::new();
    }
    let group_size = analyses.len().div_ceil(section_count.max(1));
    analyses.chunks(group_size).map(<[String]>::to_vec).collect()
}

/// Sequential section synthesis.
pub struct SectionSynthesizer<'a> {
    client: &'a dyn CompletionClient,
    settings: &'a SynthesisSettings,
}

impl<'a> SectionSynthesizer<'a> {
    /// Borrow the client and grouping settings.
    pub fn new(client: &'a dyn CompletionClient, settings: &'a SynthesisSettings) -> Self {
        Self { client, settings }
    }

    /// Produce one synthesis per section, in order. The first failure aborts the phase.
    pub async fn synthesize_sections(
        &self,
        analyses: &[String],
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<Vec<String>, PipelineError> {
        let groups = group_into_sections(analyses, self.settings.section_count);
        let total = groups.len();
        let mut sections = Vec::with_capacity(total);

        for (index, group) in groups.into_iter().enumerate() {
            cancel.check()?;
            observer.on_progress(ProgressEvent::new(
                Phase::Synthesis,
                index,
                total,
                format!("Synthesizing section {} of {}", index + 1, total),
            ));

            let request = SynthesizeSectionRequest {
                analyses: group,
                section_index: index,
                total_sections: total,
            };
            let synthesis = self
                .client
                .synthesize_section(&request)
                .await
                .map_err(|source| PipelineError::Synthesis {
                    section: index + 1,
                    source,
                })?;
            tracing::debug!(
                section = index + 1,
                total,
                chars = synthesis.len(),
                "Section synthesized"
            );
            sections.push(synthesis);
        }

        Ok(sections)
    }
}
