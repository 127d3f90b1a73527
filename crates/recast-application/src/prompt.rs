//! Stage prompt assembly.
//!
//! A stage's request is built from ordered parts: the resolved stage
//! prompt becomes the system prompt; the user prompt carries the selected
//! field contents, the nearest preceding stage's output (chained
//! refinement) and the session's running guidance.

use recast_core::character::PopulatedField;

/// The assembled prompt pair for one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Builds the prompt pair for one stage run.
pub fn build_stage_prompt(
    prompt_text: &str,
    fields: &[PopulatedField],
    prior_output: Option<&str>,
    guidance: Option<&str>,
) -> StagePrompt {
    let mut sections: Vec<String> = Vec::new();

    let mut field_block = String::from("## Selected fields\n");
    if fields.is_empty() {
        field_block.push_str("\n(no fields selected)");
    }
    for field in fields {
        field_block.push_str(&format!(
            "\n### {} ({} chars)\n{}\n",
            field.label, field.char_count, field.content
        ));
    }
    sections.push(field_block);

    if let Some(output) = prior_output {
        sections.push(format!("## Previous stage output\n\n{output}\n"));
    }
    if let Some(text) = guidance {
        sections.push(format!("## Guidance\n\n{text}\n"));
    }

    StagePrompt {
        system_prompt: prompt_text.to_string(),
        user_prompt: sections.join("\n"),
    }
}
