// All LLM prompt templates for the interview pipeline.
// Reuses system prompts from llm_client::prompts.

use serde::Serialize;

/// Work history extraction. Replace: {resume_text}, {format_instructions}
pub const WORK_EXPERIENCE_PROMPT_TEMPLATE: &str = r#"Act as a resume parser and extract the ENTIRE employment history of the resume below.
List positions in the order they appear in the document. Use "YYYY-MM" for dates and "Present" for ongoing roles.

RESUME:
{resume_text}

{format_instructions}"#;

/// Education extraction. Replace: {resume_text}, {format_instructions}
pub const EDUCATION_PROMPT_TEMPLATE: &str = r#"Act as a resume parser and extract the education details of the resume below.
Leave a field null when the resume does not state it.

RESUME:
{resume_text}

{format_instructions}"#;

/// Narrative summary. Replace: {work_experience}, {education}
pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Act as an HR assistant and write a detailed summary of the candidate described below.

WORK EXPERIENCE:
{work_experience}

EDUCATION:
{education}"#;

/// Insight extraction. Replace: {work_experience}, {education}, {format_instructions}
pub const INSIGHT_PROMPT_TEMPLATE: &str = r#"Act as an HR assistant and extract a list of discrete insights about the candidate from the resume details below.
Each insight should be one short sentence an interviewer could probe.

WORK EXPERIENCE:
{work_experience}

EDUCATION:
{education}

{format_instructions}"#;

/// Question generation. Replace: {resume_insights}, {previous_questions}, {format_instructions}
pub const QUESTION_PROMPT_TEMPLATE: &str = r#"Act as an HR assistant and generate exactly ONE interview question based on the resume insights of the candidate below.
Do NOT repeat any question from the previous question list.

RESUME INSIGHTS:
{resume_insights}

PREVIOUS QUESTIONS:
{previous_questions}

{format_instructions}"#;

/// Renders a value as pretty JSON for prompt embedding.
pub fn to_prompt_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}
