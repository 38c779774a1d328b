// src/admin.rs
//! Question bank maintenance. Every route here sits behind `require_auth`
//! and `require_admin`; edits are the only way a stored question changes.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::categories::is_known_category;
use crate::error::{AppError, AppResult};
use crate::models::{
    index_to_letter, letter_to_index, Question, QuestionInput, QuestionListQuery, QuestionRow,
    LETTERS,
};

const QUESTION_COLUMNS: &str =
    "id, category, group_codes, text, options, correct_answer, image_url, difficulty, explanation, points";

/// Trim and check an admin payload, returning the normalized form.
pub fn validate_question(input: &QuestionInput) -> AppResult<QuestionInput> {
    let invalid = |msg: &str| AppError::InvalidArgument(msg.to_string());

    let category = input.category.trim().to_string();
    if !is_known_category(&category) {
        return Err(AppError::InvalidArgument(format!(
            "Unknown category: {}",
            input.category
        )));
    }

    let mut groups: Vec<String> = Vec::new();
    for group in &input.groups {
        let group = group.trim().to_uppercase();
        if group.is_empty() {
            return Err(invalid("Group codes must not be empty"));
        }
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    if groups.is_empty() {
        return Err(invalid("At least one group is required"));
    }

    let text = input.text.trim().to_string();
    if text.is_empty() {
        return Err(invalid("Question text is required"));
    }

    if input.options.len() < 2 || input.options.len() > LETTERS.len() {
        return Err(AppError::InvalidArgument(format!(
            "A question needs between 2 and {} options",
            LETTERS.len()
        )));
    }
    let options: Vec<String> = input.options.iter().map(|o| o.trim().to_string()).collect();
    if options.iter().any(|o| o.is_empty()) {
        return Err(invalid("Options must not be empty"));
    }

    let correct_answer = letter_to_index(&input.correct_answer, options.len())
        .and_then(index_to_letter)
        .ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "Correct answer {:?} does not match any of the {} options",
                input.correct_answer,
                options.len()
            ))
        })?;

    if input.points < 0 {
        return Err(invalid("Points must not be negative"));
    }

    let difficulty = match input.difficulty.trim() {
        "" => "medium".to_string(),
        d => d.to_lowercase(),
    };

    Ok(QuestionInput {
        category,
        groups,
        text,
        options,
        correct_answer,
        image_url: input
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        difficulty,
        explanation: input.explanation.trim().to_string(),
        points: input.points,
    })
}

/// Validate and store a new question, returning its id.
pub async fn insert_question(db: &SqlitePool, input: &QuestionInput) -> AppResult<String> {
    let input = validate_question(input)?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO questions (id, category, group_codes, text, options, correct_answer, image_url,
                               difficulty, explanation, points, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&input.category)
    .bind(serde_json::to_string(&input.groups)?)
    .bind(&input.text)
    .bind(serde_json::to_string(&input.options)?)
    .bind(&input.correct_answer)
    .bind(&input.image_url)
    .bind(&input.difficulty)
    .bind(&input.explanation)
    .bind(input.points)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(id)
}

async fn fetch_question(db: &SqlitePool, id: &str) -> AppResult<Question> {
    let row: Option<QuestionRow> =
        sqlx::query_as(&format!("SELECT {} FROM questions WHERE id = ?", QUESTION_COLUMNS))
            .bind(id)
            .fetch_optional(db)
            .await?;

    let row = row.ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))?;
    Ok(row.try_into()?)
}

/// Create a question
pub async fn create_question(
    State(state): State<Arc<crate::AppState>>,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let id = insert_question(&state.db, &input).await?;
    let question = fetch_question(&state.db, &id).await?;

    tracing::info!("created question {} in {}", id, question.category);

    Ok((StatusCode::CREATED, Json(question)))
}

/// Replace every editable field of a question
pub async fn update_question(
    State(state): State<Arc<crate::AppState>>,
    Path(question_id): Path<String>,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let input = validate_question(&input)?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE questions
        SET category = ?, group_codes = ?, text = ?, options = ?, correct_answer = ?, image_url = ?,
            difficulty = ?, explanation = ?, points = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&input.category)
    .bind(serde_json::to_string(&input.groups)?)
    .bind(&input.text)
    .bind(serde_json::to_string(&input.options)?)
    .bind(&input.correct_answer)
    .bind(&input.image_url)
    .bind(&input.difficulty)
    .bind(&input.explanation)
    .bind(input.points)
    .bind(now.to_rfc3339())
    .bind(&question_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Question {} not found",
            question_id
        )));
    }

    tracing::info!("updated question {}", question_id);

    Ok(Json(fetch_question(&state.db, &question_id).await?))
}

/// Get a single question
pub async fn get_question(
    State(state): State<Arc<crate::AppState>>,
    Path(question_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(fetch_question(&state.db, &question_id).await?))
}

/// List questions with optional category/group filtering
pub async fn list_questions(
    State(state): State<Arc<crate::AppState>>,
    Query(query): Query<QuestionListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    let category = query.category.filter(|c| !c.is_empty());
    let group = query
        .group
        .map(|g| g.trim().to_uppercase())
        .filter(|g| !g.is_empty());

    let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {}
        FROM questions
        WHERE (?1 IS NULL OR category = ?1)
          AND (?2 IS NULL OR EXISTS (
                SELECT 1 FROM json_each(questions.group_codes) WHERE json_each.value = ?2))
        ORDER BY created_at DESC, id
        LIMIT ?3 OFFSET ?4
        "#,
        QUESTION_COLUMNS
    ))
    .bind(category)
    .bind(group)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let questions = rows
        .into_iter()
        .map(Question::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(questions))
}
