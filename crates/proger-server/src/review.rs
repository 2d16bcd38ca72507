//! Submission judging: run the code, then ask the model for a review.
//! The endpoint always answers; a failed model call yields a fallback review
//! that explains what went wrong.

use axum::{Json, extract::State};
use lm_client::{ChatMessage, LmError, extract_json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::problems::Problem;
use crate::sandbox::Execution;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 500;

const JUDGE_PROMPT: &str = "You are an expert competitive programming judge. Review the provided code and \
execution results. Provide a score out of 100, constructive comments, and specific improvement suggestions. \
Respond in JSON format only.";

#[derive(Debug, Deserialize)]
pub struct Submission {
    pub problem_id: u64,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDetails {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub language: String,
    pub problem_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub score: i64,
    pub comments: String,
    pub improvements: Vec<String>,
    pub execution_details: ExecutionDetails,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub review: Review,
}

/// What the model is asked to return. Fields stay loosely typed: models
/// send `85.5` or `"85"` for the score and a bare string for improvements.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelReview {
    score: Value,
    comments: Option<String>,
    improvements: Value,
}

impl ModelReview {
    fn into_review(self, execution_details: ExecutionDetails) -> Review {
        Review {
            score: parse_score(&self.score),
            comments: self.comments.unwrap_or_else(|| "No comments from LLM.".into()),
            improvements: parse_improvements(self.improvements),
            execution_details,
        }
    }
}

fn parse_score(value: &Value) -> i64 {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches("/100").trim().parse::<f64>().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite()).map_or(0, |s| s.round().clamp(0.0, 100.0) as i64)
}

fn parse_improvements(value: Value) -> Vec<String> {
    let lines = |s: &str| -> Vec<String> {
        s.lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => lines(&s),
        _ => Vec::new(),
    }
}

pub async fn submit(State(state): State<AppState>, Json(sub): Json<Submission>) -> ApiResult<Json<SubmitResponse>> {
    let problem = state
        .problems
        .read()
        .await
        .get(sub.problem_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Problem not found".into()))?;

    let execution = state.sandbox.execute(&sub.language, &sub.code, &problem.test_cases).await;
    info!(
        "Submission for problem {} ({}): success={}",
        problem.id, sub.language, execution.success
    );

    let details = ExecutionDetails {
        success: execution.success,
        output: execution.output.clone(),
        error: execution.error.clone(),
        language: sub.language.clone(),
        problem_id: sub.problem_id,
    };

    let messages = [
        ChatMessage::system(JUDGE_PROMPT),
        ChatMessage::user(review_prompt(&problem, &sub, &execution)),
    ];
    let reply = state.lm.chat(&messages, TEMPERATURE, MAX_TOKENS).await;

    let review = match reply.and_then(|text| extract_json::<ModelReview>(&text)) {
        Ok(model) => model.into_review(details),
        Err(e) => {
            warn!("LLM review failed: {}", e);
            fallback_review(&e, state.lm.config().api_url.as_str(), details)
        }
    };

    Ok(Json(SubmitResponse {
        status: "Submission processed",
        review,
    }))
}

fn review_prompt(problem: &Problem, sub: &Submission, execution: &Execution) -> String {
    format!(
        "Problem Title: {title}\n\
         Problem Description: {description}\n\
         Submitted Language: {language}\n\
         Submitted Code:\n```\n{code}\n```\n\
         Execution Success: {success}\n\
         Execution Output: {output}\n\
         Execution Error: {error}\n\n\
         Please provide a review in the following JSON format:\n\
         {{\n  \"score\": <integer_score_out_of_100>,\n  \"comments\": \"<string_constructive_comments>\",\n  \
         \"improvements\": [\"<string_suggestion_1>\", \"<string_suggestion_2>\"]\n}}",
        title = problem.title,
        description = problem.description,
        language = sub.language,
        code = sub.code,
        success = execution.success,
        output = execution.output,
        error = execution.error,
    )
}

fn fallback_review(err: &LmError, api_url: &str, details: ExecutionDetails) -> Review {
    let (comments, hint) = match err {
        LmError::Connect(_) | LmError::Timeout => (
            format!("LLM API request failed: {err}"),
            format!("Ensure the LLM server is running and accessible at {api_url}."),
        ),
        LmError::Status { code, body } => (
            format!("LLM API returned an error: {code} - {body}"),
            "Check the LLM server logs for errors.".to_string(),
        ),
        LmError::Decode(_) | LmError::MissingContent => (
            format!("Failed to parse LLM response JSON: {err}"),
            "Adjust the LLM prompt to ensure valid JSON output.".to_string(),
        ),
    };
    Review {
        score: 0,
        comments,
        improvements: vec![hint],
        execution_details: details,
    }
}
