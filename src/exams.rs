//! Test lifecycle endpoints: start, finish and history.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use crate::assembler;
use crate::error::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::{
    FinishTestRequest, ListQuery, RecordedAnswer, StartTestRequest, TestDetail, TestRecord,
    TestStatus,
};

const TEST_COLUMNS: &str =
    "id, user_id, group_code, score, total_questions, time_taken, is_passed, created_at, finished_at";

async fn fetch_test(db: &SqlitePool, user_id: &str, test_id: &str) -> AppResult<TestRecord> {
    let test: Option<TestRecord> = sqlx::query_as(&format!(
        "SELECT {} FROM tests WHERE id = ? AND user_id = ?",
        TEST_COLUMNS
    ))
    .bind(test_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    test.ok_or_else(|| AppError::NotFound(format!("Test {} not found", test_id)))
}

/// Record the outcome of a test and fold its answers into the user's stats.
///
/// All writes happen in one transaction; a test can only be finished once.
pub async fn record_finish(
    db: &SqlitePool,
    user_id: &str,
    req: &FinishTestRequest,
) -> AppResult<TestRecord> {
    if req.score < 0 || req.time_taken < 0 {
        return Err(AppError::InvalidArgument(
            "Score and time taken must not be negative".to_string(),
        ));
    }

    let test = fetch_test(db, user_id, &req.test_id).await?;

    if test.status() == TestStatus::Finished {
        return Err(AppError::Conflict(format!(
            "Test {} is already finished",
            test.id
        )));
    }
    if req.score > test.total_questions {
        return Err(AppError::InvalidArgument(format!(
            "Score {} exceeds the {} questions in this test",
            req.score, test.total_questions
        )));
    }

    let assigned: Vec<(String,)> =
        sqlx::query_as("SELECT question_id FROM test_questions WHERE test_id = ?")
            .bind(&test.id)
            .fetch_all(db)
            .await?;
    let assigned: HashSet<String> = assigned.into_iter().map(|(id,)| id).collect();

    let mut seen = HashSet::new();
    for answer in &req.user_answers {
        if !assigned.contains(&answer.question_id) {
            return Err(AppError::InvalidArgument(format!(
                "Question {} is not part of test {}",
                answer.question_id, test.id
            )));
        }
        if !seen.insert(answer.question_id.as_str()) {
            return Err(AppError::InvalidArgument(format!(
                "Question {} was answered more than once",
                answer.question_id
            )));
        }
    }

    let now = Utc::now().to_rfc3339();

    // The guarded update is the first statement, so the transaction starts
    // as a writer and a concurrent finish of the same test sees zero rows.
    let mut tx = db.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE tests SET score = ?, time_taken = ?, is_passed = ?, finished_at = ?
        WHERE id = ? AND finished_at IS NULL
        "#,
    )
    .bind(req.score)
    .bind(req.time_taken)
    .bind(req.is_passed)
    .bind(&now)
    .bind(&test.id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Test {} is already finished",
            test.id
        )));
    }

    for answer in &req.user_answers {
        let selected = answer
            .selected_answer
            .as_deref()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty());

        sqlx::query(
            r#"
            INSERT INTO user_answers (test_id, question_id, selected_answer, is_correct, answered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(test_id, question_id) DO UPDATE SET
                selected_answer = excluded.selected_answer,
                is_correct = excluded.is_correct,
                answered_at = excluded.answered_at
            "#,
        )
        .bind(&test.id)
        .bind(&answer.question_id)
        .bind(selected)
        .bind(answer.is_correct)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let (correct, wrong): (i64, i64) = if answer.is_correct { (1, 0) } else { (0, 1) };
        sqlx::query(
            r#"
            INSERT INTO question_stats (user_id, question_id, correct_count, wrong_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, question_id) DO UPDATE SET
                correct_count = correct_count + excluded.correct_count,
                wrong_count = wrong_count + excluded.wrong_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&answer.question_id)
        .bind(correct)
        .bind(wrong)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "user {} finished test {}: {}/{} ({})",
        user_id,
        test.id,
        req.score,
        test.total_questions,
        if req.is_passed { "passed" } else { "failed" }
    );

    fetch_test(db, user_id, &test.id).await
}

/// Assemble and start a new test; a missing body counts as a missing group
pub async fn start_test(
    State(state): State<Arc<crate::AppState>>,
    user: AuthUser,
    payload: Option<Json<StartTestRequest>>,
) -> AppResult<impl IntoResponse> {
    let group = payload.and_then(|Json(req)| req.group);
    let response = assembler::start_test(&state.db, &user.id, group.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Submit results for a started test
pub async fn finish_test(
    State(state): State<Arc<crate::AppState>>,
    user: AuthUser,
    payload: Result<Json<FinishTestRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = payload?;
    Ok(Json(record_finish(&state.db, &user.id, &req).await?))
}

/// List the caller's tests, newest first
pub async fn list_tests(
    State(state): State<Arc<crate::AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let tests: Vec<TestRecord> = sqlx::query_as(&format!(
        r#"
        SELECT {}
        FROM tests
        WHERE user_id = ?
        ORDER BY created_at DESC
        LIMIT ? OFFSET ?
        "#,
        TEST_COLUMNS
    ))
    .bind(&user.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(tests))
}

/// Get one of the caller's tests with its question set and answers
pub async fn get_test(
    State(state): State<Arc<crate::AppState>>,
    user: AuthUser,
    Path(test_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let test = fetch_test(&state.db, &user.id, &test_id).await?;

    let question_ids: Vec<(String,)> = sqlx::query_as(
        "SELECT question_id FROM test_questions WHERE test_id = ? ORDER BY position",
    )
    .bind(&test.id)
    .fetch_all(&state.db)
    .await?;

    let answers: Vec<RecordedAnswer> = sqlx::query_as(
        r#"
        SELECT ua.question_id, ua.selected_answer, ua.is_correct
        FROM user_answers ua
        JOIN test_questions tq ON tq.test_id = ua.test_id AND tq.question_id = ua.question_id
        WHERE ua.test_id = ?
        ORDER BY tq.position
        "#,
    )
    .bind(&test.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(TestDetail {
        status: test.status(),
        test,
        question_ids: question_ids.into_iter().map(|(id,)| id).collect(),
        answers,
    }))
}
