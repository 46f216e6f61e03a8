//! Request Assembly
//!
//! Pure construction of the generation request: item breakdown, time budget and the
//! instruction payload. Identical inputs always yield an identical request.

use crate::types::RemoteRef;
use serde::{Deserialize, Serialize};

/// Upper bound on items per exam
pub const MAX_TOTAL_ITEMS: u32 = 200;

/// Style sample text beyond this many characters is dropped
pub const STYLE_SAMPLE_MAX_CHARS: usize = 12_000;

/// Shortest time budget ever suggested
pub const MIN_TIME_BUDGET_MINUTES: u32 = 10;

const SECONDS_PER_MULTIPLE_CHOICE: u32 = 60;
const SECONDS_PER_TRUE_FALSE: u32 = 30;
const SECONDS_PER_SHORT_ANSWER: u32 = 180;
const SECONDS_PER_ESSAY: u32 = 600;

/// Item counts per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBreakdown {
    pub multiple_choice: u32,
    pub true_false: u32,
    pub short_answer: u32,
    pub essay: u32,
}

impl ItemBreakdown {
    /// Split `total` into 50% multiple choice, 25% true/false, 25% short answer, with
    /// essays taking whatever rounding left over.
    pub fn partition(total: u32) -> Self {
        let multiple_choice = total / 2;
        let true_false = total / 4;
        let short_answer = total / 4;
        let essay = total.saturating_sub(multiple_choice + true_false + short_answer);
        Self {
            multiple_choice,
            true_false,
            short_answer,
            essay,
        }
    }

    pub fn total(&self) -> u32 {
        self.multiple_choice + self.true_false + self.short_answer + self.essay
    }

    /// Suggested completion time in whole minutes.
    pub fn time_budget_minutes(&self) -> u32 {
        let seconds = self.multiple_choice * SECONDS_PER_MULTIPLE_CHOICE
            + self.true_false * SECONDS_PER_TRUE_FALSE
            + self.short_answer * SECONDS_PER_SHORT_ANSWER
            + self.essay * SECONDS_PER_ESSAY;
        seconds.div_ceil(60).max(MIN_TIME_BUDGET_MINUTES)
    }
}

/// Extracted text of a document whose style the exam should imitate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSample(String);

impl StyleSample {
    /// `None` for blank text; otherwise trimmed and cut to [`STYLE_SAMPLE_MAX_CHARS`].
    pub fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let cut: String = trimmed.chars().take(STYLE_SAMPLE_MAX_CHARS).collect();
        Some(Self(cut))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSpec {
    pub title: String,
    pub total_items: u32,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub style_sample: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateKind {
    WithStyleSample,
    WithoutStyleSample,
}

/// Fully assembled request for the generation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub document_refs: Vec<RemoteRef>,
    pub instructions: String,
    pub breakdown: ItemBreakdown,
    pub time_budget_minutes: u32,
    pub template: TemplateKind,
}

pub struct RequestAssembler;

impl RequestAssembler {
    pub fn assemble(document_refs: &[RemoteRef], spec: &ExamSpec) -> GenerationRequest {
        let breakdown = ItemBreakdown::partition(spec.total_items);
        let time_budget_minutes = breakdown.time_budget_minutes();
        let style = spec.style_sample.as_deref().and_then(StyleSample::from_text);
        let template = if style.is_some() {
            TemplateKind::WithStyleSample
        } else {
            TemplateKind::WithoutStyleSample
        };

        let instructions = render_instructions(
            spec.title.trim(),
            &breakdown,
            time_budget_minutes,
            spec.custom_instructions.as_deref(),
            style.as_ref(),
        );

        GenerationRequest {
            document_refs: document_refs.to_vec(),
            instructions,
            breakdown,
            time_budget_minutes,
            template,
        }
    }
}

fn render_instructions(
    title: &str,
    breakdown: &ItemBreakdown,
    time_budget_minutes: u32,
    custom_instructions: Option<&str>,
    style: Option<&StyleSample>,
) -> String {
    let mut out = String::new();

    out.push_str("You are preparing a written exam from the attached source documents.\n");
    out.push_str("Every question must be answerable from those documents alone.\n\n");

    match style {
        Some(sample) => {
            out.push_str("## Style reference\n");
            out.push_str(
                "Match the tone, difficulty, numbering and layout of the sample exam below. \
                 Do not copy its questions.\n",
            );
            out.push_str("<<<SAMPLE\n");
            out.push_str(sample.as_str());
            out.push_str("\nSAMPLE>>>\n\n");
        }
        None => {
            out.push_str("## Style\n");
            out.push_str(
                "Use a neutral academic tone. Number questions consecutively across sections.\n\n",
            );
        }
    }

    out.push_str("## Output format\n");
    out.push_str(&format!("- Begin with the title line: # {}\n", title));
    out.push_str(&format!(
        "- Under the title write: Suggested time: {} minutes\n",
        time_budget_minutes
    ));
    out.push_str("- Write plain Markdown only. No HTML, no LaTeX, no code fences.\n");
    out.push_str(
        "- Output only the exam. No preamble, no explanations, no remarks about these instructions.\n\n",
    );

    out.push_str("## Sections and item counts\n");
    let sections = [
        (
            "Multiple Choice",
            breakdown.multiple_choice,
            "four options labelled A-D, exactly one correct",
        ),
        ("True or False", breakdown.true_false, "a single statement each"),
        (
            "Short Answer",
            breakdown.short_answer,
            "answerable in one to three sentences",
        ),
        ("Essay", breakdown.essay, "open questions requiring an argued answer"),
    ];
    for (name, count, shape) in sections.iter() {
        if *count == 0 {
            continue;
        }
        out.push_str(&format!("- {}: exactly {} items, {}\n", name, count, shape));
    }
    out.push_str(&format!(
        "- Total: exactly {} items. Omit sections with zero items.\n\n",
        breakdown.total()
    ));

    if let Some(extra) = custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str("## Additional instructions\n");
        out.push_str(extra);
        out.push_str("\n\n");
    }

    out.push_str("## Answer key\n");
    out.push_str("Close the document with a section titled \"## Answer Key\" containing:\n");
    out.push_str("- Multiple Choice: question number and the correct letter\n");
    out.push_str("- True or False: question number and True or False\n");
    out.push_str("- Short Answer: question number and a model answer\n");
    out.push_str("- Essay: question number and the key points a full answer covers\n");

    out
}
