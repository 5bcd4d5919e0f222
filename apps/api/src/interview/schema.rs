//! Typed records produced by the pipeline stages, plus the aggregate
//! `SessionState` that is checkpointed per session.
//!
//! Each structured record implements `StructuredOutput`, which supplies the
//! machine-readable schema embedded in the stage prompt.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A record the model is asked to emit as JSON.
pub trait StructuredOutput: DeserializeOwned {
    /// Name used in prompts and decode errors.
    const NAME: &'static str;

    /// JSON-schema description of the record: field names, types, optionality.
    fn schema() -> Value;

    /// Prompt fragment instructing the model to answer with a conforming value.
    fn format_instructions() -> String {
        let schema = serde_json::to_string_pretty(&Self::schema()).unwrap_or_default();
        format!(
            "The output MUST be a single JSON object of type {} conforming to this JSON schema. \
             Fields not listed in \"required\" may be null or omitted.\n{schema}",
            Self::NAME
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkExperience {
    pub company: String,
    pub role: String,
    /// "YYYY-MM"
    #[serde(default)]
    pub start_date: Option<String>,
    /// "YYYY-MM" or "Present"
    #[serde(default)]
    pub end_date: Option<String>,
    pub description: String,
}

/// Employment history in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkExperienceList {
    pub work_experiences: Vec<WorkExperience>,
}

impl WorkExperienceList {
    pub fn is_empty(&self) -> bool {
        self.work_experiences.is_empty()
    }
}

impl StructuredOutput for WorkExperienceList {
    const NAME: &'static str = "WorkExperienceList";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "work_experiences": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "company": {"type": "string"},
                            "role": {"type": "string"},
                            "start_date": {"type": ["string", "null"], "description": "YYYY-MM"},
                            "end_date": {"type": ["string", "null"], "description": "YYYY-MM or Present"},
                            "description": {"type": "string"}
                        },
                        "required": ["company", "role", "description"]
                    }
                }
            },
            "required": ["work_experiences"]
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationList {
    pub education: Vec<Education>,
}

impl EducationList {
    pub fn is_empty(&self) -> bool {
        self.education.is_empty()
    }
}

impl StructuredOutput for EducationList {
    const NAME: &'static str = "EducationList";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "education": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "institution": {"type": ["string", "null"]},
                            "degree": {"type": ["string", "null"]},
                            "field": {"type": ["string", "null"]},
                            "start_year": {"type": ["integer", "null"]},
                            "end_year": {"type": ["integer", "null"]}
                        }
                    }
                }
            },
            "required": ["education"]
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeInsight {
    pub insights: Vec<String>,
}

impl StructuredOutput for ResumeInsight {
    const NAME: &'static str = "ResumeInsight";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "insights": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["insights"]
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub question: String,
}

impl StructuredOutput for InterviewQuestion {
    const NAME: &'static str = "InterviewQuestion";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string"}
            },
            "required": ["question"]
        })
    }
}

/// Aggregate pipeline state; the unit of persistence.
///
/// `Default` is the state of a session that has never been written.
/// `interview_question_list` is append-only for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub resume_text: String,
    pub work_experience_list: WorkExperienceList,
    pub education_list: EducationList,
    pub resume_insights: ResumeInsight,
    pub interview_question_list: Vec<InterviewQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_summary: Option<String>,
}

impl SessionState {
    /// Fresh state for a new resume run.
    pub fn from_resume(resume_text: impl Into<String>) -> Self {
        Self {
            resume_text: resume_text.into(),
            ..Self::default()
        }
    }

    pub fn latest_question(&self) -> Option<&InterviewQuestion> {
        self.interview_question_list.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_tolerates_missing_fields() {
        let state: SessionState = serde_json::from_str(r#"{"resume_text":"cv"}"#).unwrap();
        assert_eq!(state.resume_text, "cv");
        assert!(state.work_experience_list.is_empty());
        assert!(state.interview_question_list.is_empty());
        assert!(state.resume_summary.is_none());
    }

    #[test]
    fn test_session_state_omits_absent_summary() {
        let json = serde_json::to_value(SessionState::from_resume("cv")).unwrap();
        assert!(json.get("resume_summary").is_none());
        assert_eq!(json["interview_question_list"], json!([]));
        assert_eq!(json["work_experience_list"], json!({"work_experiences": []}));
    }

    #[test]
    fn test_format_instructions_embed_schema() {
        let instructions = WorkExperienceList::format_instructions();
        assert!(instructions.contains("WorkExperienceList"));
        assert!(instructions.contains("\"work_experiences\""));
        assert!(instructions.contains("YYYY-MM or Present"));
    }

    #[test]
    fn test_latest_question_is_last_appended() {
        let mut state = SessionState::default();
        assert!(state.latest_question().is_none());
        state.interview_question_list.push(InterviewQuestion {
            question: "first".into(),
        });
        state.interview_question_list.push(InterviewQuestion {
            question: "second".into(),
        });
        assert_eq!(state.latest_question().unwrap().question, "second");
    }
}
