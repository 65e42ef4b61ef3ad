use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ApiError;
use engine::modifier::operation_tool_definitions;
use engine::{sort_steps, validate_dag, Dag, EngineError, ToolRef};

#[derive(Debug, Deserialize)]
pub struct ValidateDagDto {
    pub dag: Dag,
    /// Optional allow-list of tool references.
    #[serde(default)]
    pub tools: Option<Vec<ToolRef>>,
}

#[derive(Debug, Serialize)]
pub struct ValidateDagResponse {
    pub valid: bool,
    /// Step ids in execution order.
    pub order: Vec<String>,
}

pub async fn validate(Json(payload): Json<ValidateDagDto>) -> Result<Json<ValidateDagResponse>, ApiError> {
    validate_dag(&payload.dag, payload.tools.as_deref()).map_err(EngineError::from)?;

    let order = sort_steps(&payload.dag.steps)
        .into_iter()
        .map(|s| s.id)
        .collect();
    Ok(Json(ValidateDagResponse { valid: true, order }))
}

/// Edit-operation tool definitions to offer a model.
pub async fn operations() -> Json<Vec<Value>> {
    Json(operation_tool_definitions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use engine::Step;

    #[tokio::test]
    async fn valid_dag_reports_order() {
        let dag = Dag::new(vec![
            Step::new("b", "B", "b").after(&["a"]),
            Step::new("a", "A", "a"),
        ]);

        let Json(response) = validate(Json(ValidateDagDto { dag, tools: None })).await.unwrap();

        assert!(response.valid);
        assert_eq!(response.order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cycle_is_unprocessable() {
        let dag = Dag::new(vec![
            Step::new("a", "A", "a").after(&["b"]),
            Step::new("b", "B", "b").after(&["a"]),
        ]);

        let err = validate(Json(ValidateDagDto { dag, tools: None })).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "invalid_dag");
    }

    #[tokio::test]
    async fn operations_lists_four_tools() {
        let Json(defs) = operations().await;
        assert_eq!(defs.len(), 4);
    }
}
