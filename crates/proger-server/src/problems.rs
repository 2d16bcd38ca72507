use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Assigned by the store; any value sent by the client is ignored.
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub description: String,
    pub input_format: String,
    pub output_format: String,
    pub sample_input: String,
    pub sample_output: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug)]
pub struct ProblemStore {
    problems: Vec<Problem>,
    next_id: u64,
}

impl Default for ProblemStore {
    fn default() -> Self {
        Self {
            problems: Vec::new(),
            next_id: 1,
        }
    }
}

impl ProblemStore {
    pub fn insert(&mut self, mut problem: Problem) -> Problem {
        problem.id = self.next_id;
        self.next_id += 1;
        self.problems.push(problem.clone());
        problem
    }

    pub fn get(&self, id: u64) -> Option<&Problem> {
        self.problems.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[Problem] {
        &self.problems
    }
}

pub async fn list_problems(State(state): State<AppState>) -> Json<Vec<Problem>> {
    Json(state.problems.read().await.all().to_vec())
}

pub async fn create_problem(State(state): State<AppState>, Json(problem): Json<Problem>) -> Json<Problem> {
    let problem = state.problems.write().await.insert(problem);
    info!("Problem {} '{}' created", problem.id, problem.title);
    Json(problem)
}

pub async fn get_problem(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Problem>> {
    state
        .problems
        .read()
        .await
        .get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Problem not found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(title: &str) -> Problem {
        Problem {
            id: 99,
            title: title.into(),
            description: String::new(),
            input_format: String::new(),
            output_format: String::new(),
            sample_input: String::new(),
            sample_output: String::new(),
            test_cases: Vec::new(),
        }
    }

    #[test]
    fn test_ids_start_at_one_and_ignore_client_value() {
        let mut store = ProblemStore::default();
        assert_eq!(store.insert(problem("A")).id, 1);
        assert_eq!(store.insert(problem("B")).id, 2);
        assert_eq!(store.get(2).unwrap().title, "B");
        assert!(store.get(99).is_none());
        assert_eq!(store.all().len(), 2);
    }
}
