//! The five pipeline stages.
//!
//! A stage is described by a `StageDescriptor`: its name, a prompt builder
//! that reads the upstream fields of `SessionState`, an output applier that
//! decodes the model's answer and writes the stage's own field, and a flag
//! marking whether its token stream is exposed to clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::interview::decoder::{decode, DecodeError};
use crate::interview::prompts::{
    to_prompt_json, EDUCATION_PROMPT_TEMPLATE, INSIGHT_PROMPT_TEMPLATE,
    QUESTION_PROMPT_TEMPLATE, SUMMARY_PROMPT_TEMPLATE, WORK_EXPERIENCE_PROMPT_TEMPLATE,
};
use crate::interview::schema::{
    EducationList, InterviewQuestion, ResumeInsight, SessionState, StructuredOutput,
    WorkExperienceList,
};
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, PROSE_SYSTEM};
use crate::llm_client::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    WorkExperienceParser,
    EducationParser,
    Summarizer,
    ResumeInsight,
    GenerateQuestion,
}

impl Stage {
    /// Chain order, START to END.
    pub const ALL: [Stage; 5] = [
        Stage::WorkExperienceParser,
        Stage::EducationParser,
        Stage::Summarizer,
        Stage::ResumeInsight,
        Stage::GenerateQuestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::WorkExperienceParser => "work_experience_parser",
            Stage::EducationParser => "education_parser",
            Stage::Summarizer => "summarizer",
            Stage::ResumeInsight => "resume_insight",
            Stage::GenerateQuestion => "generate_question",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage}: completion service failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("{stage}: {source}")]
    Decode {
        stage: Stage,
        #[source]
        source: DecodeError,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Transport { stage, .. } | StageError::Decode { stage, .. } => *stage,
        }
    }
}

/// Prompt and system instruction for one completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub text: String,
    pub system: &'static str,
}

pub type PromptFn = fn(&SessionState) -> StagePrompt;
pub type ApplyFn = fn(SessionState, &str) -> Result<SessionState, StageError>;

#[derive(Clone, Copy)]
pub struct StageDescriptor {
    pub stage: Stage,
    pub prompt: PromptFn,
    pub apply: ApplyFn,
    /// Token stream is forwarded to clients in streamed mode.
    pub streams: bool,
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("stage", &self.stage)
            .field("streams", &self.streams)
            .finish()
    }
}

impl StageDescriptor {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::WorkExperienceParser => Self {
                stage,
                prompt: work_experience_prompt,
                apply: apply_work_experience,
                streams: false,
            },
            Stage::EducationParser => Self {
                stage,
                prompt: education_prompt,
                apply: apply_education,
                streams: false,
            },
            Stage::Summarizer => Self {
                stage,
                prompt: summary_prompt,
                apply: apply_summary,
                streams: true,
            },
            Stage::ResumeInsight => Self {
                stage,
                prompt: insight_prompt,
                apply: apply_insights,
                streams: false,
            },
            Stage::GenerateQuestion => Self {
                stage,
                prompt: question_prompt,
                apply: apply_question,
                streams: true,
            },
        }
    }
}

fn decode_for<T: StructuredOutput>(stage: Stage, raw: &str) -> Result<T, StageError> {
    decode::<T>(raw).map_err(|source| {
        debug!(%stage, raw = %source.raw, "undecodable stage output");
        StageError::Decode { stage, source }
    })
}

// ── work_experience_parser ──────────────────────────────────────────────────

fn work_experience_prompt(state: &SessionState) -> StagePrompt {
    StagePrompt {
        text: WORK_EXPERIENCE_PROMPT_TEMPLATE
            .replace("{resume_text}", &state.resume_text)
            .replace(
                "{format_instructions}",
                &WorkExperienceList::format_instructions(),
            ),
        system: JSON_ONLY_SYSTEM,
    }
}

fn apply_work_experience(mut state: SessionState, raw: &str) -> Result<SessionState, StageError> {
    state.work_experience_list = decode_for(Stage::WorkExperienceParser, raw)?;
    if state.work_experience_list.is_empty() {
        debug!("no work experience found in resume");
    }
    Ok(state)
}

// ── education_parser ────────────────────────────────────────────────────────

fn education_prompt(state: &SessionState) -> StagePrompt {
    StagePrompt {
        text: EDUCATION_PROMPT_TEMPLATE
            .replace("{resume_text}", &state.resume_text)
            .replace("{format_instructions}", &EducationList::format_instructions()),
        system: JSON_ONLY_SYSTEM,
    }
}

fn apply_education(mut state: SessionState, raw: &str) -> Result<SessionState, StageError> {
    state.education_list = decode_for(Stage::EducationParser, raw)?;
    if state.education_list.is_empty() {
        debug!("no education found in resume");
    }
    Ok(state)
}

// ── summarizer ──────────────────────────────────────────────────────────────

fn summary_prompt(state: &SessionState) -> StagePrompt {
    StagePrompt {
        text: SUMMARY_PROMPT_TEMPLATE
            .replace("{work_experience}", &to_prompt_json(&state.work_experience_list))
            .replace("{education}", &to_prompt_json(&state.education_list)),
        system: PROSE_SYSTEM,
    }
}

fn apply_summary(mut state: SessionState, raw: &str) -> Result<SessionState, StageError> {
    state.resume_summary = Some(raw.trim().to_string());
    Ok(state)
}

// ── resume_insight ──────────────────────────────────────────────────────────

fn insight_prompt(state: &SessionState) -> StagePrompt {
    StagePrompt {
        text: INSIGHT_PROMPT_TEMPLATE
            .replace("{work_experience}", &to_prompt_json(&state.work_experience_list))
            .replace("{education}", &to_prompt_json(&state.education_list))
            .replace("{format_instructions}", &ResumeInsight::format_instructions()),
        system: JSON_ONLY_SYSTEM,
    }
}

fn apply_insights(mut state: SessionState, raw: &str) -> Result<SessionState, StageError> {
    state.resume_insights = decode_for(Stage::ResumeInsight, raw)?;
    Ok(state)
}

// ── generate_question ───────────────────────────────────────────────────────

fn question_prompt(state: &SessionState) -> StagePrompt {
    StagePrompt {
        text: QUESTION_PROMPT_TEMPLATE
            .replace("{resume_insights}", &to_prompt_json(&state.resume_insights))
            .replace(
                "{previous_questions}",
                &to_prompt_json(&state.interview_question_list),
            )
            .replace(
                "{format_instructions}",
                &InterviewQuestion::format_instructions(),
            ),
        system: JSON_ONLY_SYSTEM,
    }
}

fn apply_question(mut state: SessionState, raw: &str) -> Result<SessionState, StageError> {
    let question: InterviewQuestion = decode_for(Stage::GenerateQuestion, raw)?;
    // Repeat avoidance is a prompt hint only; a repeat is still appended.
    if is_repeat(&state.interview_question_list, &question) {
        warn!(
            "generate_question repeated an earlier question: {:?}",
            question.question
        );
    }
    state.interview_question_list.push(question);
    Ok(state)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_repeat(previous: &[InterviewQuestion], candidate: &InterviewQuestion) -> bool {
    let candidate = normalize(&candidate.question);
    previous.iter().any(|q| normalize(&q.question) == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::schema::WorkExperience;

    fn state_with_history() -> SessionState {
        let mut state = SessionState::from_resume("Jane Doe\nAcme Corp, Engineer 2020-2024");
        state.work_experience_list.work_experiences.push(WorkExperience {
            company: "Acme Corp".into(),
            role: "Engineer".into(),
            start_date: Some("2020-01".into()),
            end_date: Some("2024-06".into()),
            description: "Payments platform".into(),
        });
        state.resume_insights.insights.push("Led payments migration".into());
        state.interview_question_list.push(InterviewQuestion {
            question: "Tell me about the payments migration.".into(),
        });
        state
    }

    #[test]
    fn test_stage_names_match_wire_tags() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
    }

    #[test]
    fn test_only_summarizer_and_question_stream() {
        let streaming: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| StageDescriptor::for_stage(*s).streams)
            .collect();
        assert_eq!(streaming, vec![Stage::Summarizer, Stage::GenerateQuestion]);
    }

    #[test]
    fn test_parser_prompts_embed_resume_and_schema() {
        let state = state_with_history();
        let prompt = work_experience_prompt(&state);
        assert!(prompt.text.contains("Acme Corp, Engineer 2020-2024"));
        assert!(prompt.text.contains("\"work_experiences\""));
        assert_eq!(prompt.system, JSON_ONLY_SYSTEM);

        let prompt = education_prompt(&state);
        assert!(prompt.text.contains("\"education\""));
        assert!(!prompt.text.contains("{resume_text}"));
    }

    #[test]
    fn test_summary_prompt_reads_parsed_lists_not_raw_text() {
        let state = state_with_history();
        let prompt = summary_prompt(&state);
        assert!(prompt.text.contains("Payments platform"));
        assert!(!prompt.text.contains("Jane Doe"));
        assert_eq!(prompt.system, PROSE_SYSTEM);
    }

    #[test]
    fn test_question_prompt_lists_previous_questions() {
        let prompt = question_prompt(&state_with_history());
        assert!(prompt.text.contains("Led payments migration"));
        assert!(prompt.text.contains("Tell me about the payments migration."));
        assert!(prompt.text.contains("Do NOT repeat"));
    }

    #[test]
    fn test_apply_question_appends() {
        let state = state_with_history();
        let state = apply_question(state, r#"{"question":"How did you test it?"}"#).unwrap();
        assert_eq!(state.interview_question_list.len(), 2);
        assert_eq!(
            state.latest_question().unwrap().question,
            "How did you test it?"
        );
    }

    #[test]
    fn test_apply_question_keeps_repeats() {
        let state = state_with_history();
        let state =
            apply_question(state, r#"{"question":"tell me about the  payments migration."}"#)
                .unwrap();
        assert_eq!(state.interview_question_list.len(), 2);
    }

    #[test]
    fn test_apply_failure_names_stage() {
        let err = apply_insights(SessionState::default(), "not json").unwrap_err();
        assert_eq!(err.stage(), Stage::ResumeInsight);
        assert!(matches!(err, StageError::Decode { .. }));
    }

    #[test]
    fn test_apply_summary_trims_text() {
        let state = apply_summary(SessionState::default(), "  Seasoned engineer.\n").unwrap();
        assert_eq!(state.resume_summary.as_deref(), Some("Seasoned engineer."));
    }

    #[test]
    fn test_is_repeat_ignores_case_and_spacing() {
        let previous = vec![InterviewQuestion {
            question: "Why Rust?".into(),
        }];
        assert!(is_repeat(
            &previous,
            &InterviewQuestion {
                question: "  why   rust? ".into()
            }
        ));
        assert!(!is_repeat(
            &previous,
            &InterviewQuestion {
                question: "Why Go?".into()
            }
        ));
    }
}
