//! Prompts for the slide-planning model.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the planner's behaviour (tone,
//!    schema, figure handling) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the assembled prompts without
//!    spinning up a real model, making prompt regressions easy to catch.

use crate::artifact::Figure;
use std::fmt::Write as _;

/// System prompt for slide planning.
///
/// The persona is a presenter walking peers through the document; the
/// narration field carries the information-dense script while slide content
/// stays minimal for on-screen legibility.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are an experienced presenter preparing a narrated slide deck that explains a document to colleagues. Your tone is conversational and insightful. Refer to the document's authors as 'the authors' or 'the document', never 'we'.

Respond with a single JSON object of the form {"slides": [...]}. Each slide object has these exact keys:
- "slide_number": integer slide order, starting at 1.
- "title": a concise slide title.
- "content": an array of short bullet strings for the on-screen body. Keep it minimal: if the slide embeds a figure, at most 2 short bullets; otherwise 3-4 bullets.
- "narration": the full spoken script for the slide, suitable for text-to-speech. Maximize information transfer here, not in "content".
- "figure_id": the id of an available figure to show on this slide, or null.

The output MUST be a single valid JSON object with properly escaped strings. Do not emit any text outside the JSON object."#;

/// Build the user prompt from the compacted document text, available
/// figures, and the slide-count instruction.
pub fn planner_user_prompt(text: &str, figures: &[Figure], count_instruction: &str) -> String {
    let mut prompt = String::with_capacity(text.len() + 1024);

    if !figures.is_empty() {
        prompt.push_str(
            "IMPORTANT: Review the available figures first. Where a figure is relevant to a \
             slide, set that slide's \"figure_id\" to the figure's id.\n\n--- AVAILABLE FIGURES ---\n",
        );
        for fig in figures {
            let _ = writeln!(
                prompt,
                "- id: {}\n  Title: {}\n  Caption: {}\n  Page: {}",
                fig.id, fig.title, fig.caption, fig.page
            );
        }
        prompt.push('\n');
    }

    let _ = writeln!(prompt, "{count_instruction}\n");
    prompt.push_str("--- TEXT TO CONVERT ---\n");
    prompt.push_str(text);
    prompt.push_str("\n--- END OF TEXT ---\n");
    if !figures.is_empty() {
        prompt.push_str("Remember to reference the figures where appropriate.\n");
    }
    prompt
}

/// Count instruction for an exact target.
pub fn exact_count_instruction(count: usize) -> String {
    format!("Break the text into exactly {count} slides.")
}

/// Count instruction when the model may choose, within bounds.
pub fn auto_count_instruction(min: usize, max: usize) -> String {
    format!(
        "Break the text into however many slides it deserves, between {min} and {max}; \
         prefer fewer, denser slides over thin ones."
    )
}

/// Repair prompt: sent as the user message of the single repair round-trip,
/// carrying the validation failure verbatim so the model can correct it.
pub fn repair_prompt(problem: &str, previous_output: &str) -> String {
    format!(
        "Your previous slide deck response was invalid: {problem}\n\n\
         Previous response:\n{previous_output}\n\n\
         Produce a corrected JSON object with the same schema, fixing only the problem described."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn figure(id: &str) -> Figure {
        Figure {
            id: id.into(),
            number: 1,
            page: 2,
            region: [0.0, 0.0, 100.0, 100.0],
            title: "Figure 1: Architecture".into(),
            caption: "The system architecture.".into(),
            image_path: PathBuf::from("/figs/figure-1.png"),
        }
    }

    #[test]
    fn user_prompt_lists_figures_when_present() {
        let prompt = planner_user_prompt("Some text.", &[figure("img-0")], "exactly 5");
        assert!(prompt.contains("AVAILABLE FIGURES"));
        assert!(prompt.contains("id: img-0"));
        assert!(prompt.contains("Some text."));
    }

    #[test]
    fn user_prompt_omits_figure_block_when_empty() {
        let prompt = planner_user_prompt("Some text.", &[], "exactly 5");
        assert!(!prompt.contains("AVAILABLE FIGURES"));
    }

    #[test]
    fn count_instructions() {
        assert!(exact_count_instruction(7).contains("exactly 7"));
        let auto = auto_count_instruction(2, 20);
        assert!(auto.contains("between 2 and 20"));
    }

    #[test]
    fn repair_prompt_carries_problem_and_previous() {
        let p = repair_prompt("expected 7 slides, got 5", "{\"slides\": []}");
        assert!(p.contains("expected 7 slides, got 5"));
        assert!(p.contains("{\"slides\": []}"));
    }
}
