// Shared prompt constants and prompt-building utilities.
// Stage-specific prompts live in interview/prompts.rs.

/// System prompt for stages that must return structured output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured HR assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt for stages that return free-form prose.
pub const PROSE_SYSTEM: &str = "You are an experienced HR assistant. \
    Write clear, factual prose based only on the details provided. \
    Do NOT invent employers, dates, or qualifications.";
