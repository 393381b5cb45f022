use std::fmt;

use tracing::info;

use crate::{agents::Agent, errors::Result, models::ContentBlock};

pub const INDOOR_SCENE_QUESTION: &str = "Is this image showing an indoor environment like a room, office, or living space that could be decorated for Christmas? Answer with YES or NO and a brief reason.";

/// Number of leading characters searched for an embedded "NO," / "NO.".
const NEGATION_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Image,
    Prompt,
}

impl Gate {
    pub fn label(&self) -> &'static str {
        match self {
            Gate::Image => "Image",
            Gate::Prompt => "Prompt",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub raw_text: String,
    pub passed: bool,
}

impl ValidationVerdict {
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let passed = verdict_passes(&raw_text);
        Self { raw_text, passed }
    }
}

/// Yes/no heuristic over a model's answer.
///
/// Fails when the trimmed, upper-cased text starts with "NO", or when "NO," or
/// "NO." occurs within its first ten characters. Anything else passes, so
/// "NOTABLE" fails and "ANSWER: NO." passes.
pub fn verdict_passes(text: &str) -> bool {
    let normalized = text.trim().to_uppercase();
    if normalized.starts_with("NO") {
        return false;
    }

    let head: String = normalized.chars().take(NEGATION_WINDOW).collect();
    !(head.contains("NO,") || head.contains("NO."))
}

pub fn prompt_relevance_question(prompt: &str) -> String {
    format!(
        "The user wants to: '{}'. Is this request relevant and achievable for decorating this image? Answer with YES or NO and a brief reason.",
        prompt
    )
}

/// Asks `agent` a closed question about `image` and turns the answer into a verdict.
pub async fn evaluate(
    agent: &Agent,
    gate: Gate,
    question: &str,
    image: ContentBlock,
) -> Result<ValidationVerdict> {
    let response = agent.run(&[ContentBlock::text(question), image]).await?;
    let verdict = ValidationVerdict::from_text(response.primary_text().unwrap_or_default());

    info!(
        target: "pipeline",
        %gate,
        passed = verdict.passed,
        verdict = %verdict.raw_text,
        "validation verdict"
    );

    Ok(verdict)
}
