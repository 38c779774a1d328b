//! Adaptive test assembly.
//!
//! A test is built category by category from the fixed [`CATEGORIES`] table.
//! Each category contributes a random baseline of up to its target count,
//! a few of which may be swapped for questions the user keeps getting
//! wrong. Every question's options are then shuffled and its answer letter
//! remapped to follow the correct option.
//!
//! The selection functions are synchronous and take the RNG as a parameter;
//! [`start_test`] fetches candidates, runs selection with a thread-local RNG
//! and persists the test and its question set in one transaction.

use chrono::Utc;
use rand::{seq::SliceRandom, Rng};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::categories::{nominal_total, CategoryConfig, CATEGORIES};
use crate::error::{AppError, AppResult};
use crate::models::{
    index_to_letter, letter_to_index, Candidate, CandidateRow, Question, QuestionStat,
    StartTestResponse, LETTERS,
};

/// Upper bound on weak questions injected into one category.
pub const MAX_WEAK_PER_CATEGORY: usize = 2;

/// Weak questions may replace at most this share of a category's target.
pub const WEAK_SHARE: f64 = 0.2;

/// `ratio * ln(attempts + 1)`; zero for unseen or never-missed questions.
pub fn weakness_weight(stat: &QuestionStat) -> f64 {
    let attempts = stat.attempts();
    if attempts <= 0 || stat.wrong_count <= 0 {
        return 0.0;
    }
    stat.weakness_ratio() * ((attempts + 1) as f64).ln()
}

pub fn weak_injection_count(target: usize, weak_candidates: usize) -> usize {
    let share = (target as f64 * WEAK_SHARE).floor() as usize;
    MAX_WEAK_PER_CATEGORY.min(share).min(weak_candidates)
}

/// Draw up to `k` distinct items, each draw proportional to the weights
/// still left in the pool.
pub fn weighted_sample<T, R>(mut pool: Vec<(T, f64)>, k: usize, rng: &mut R) -> Vec<T>
where
    R: Rng + ?Sized,
{
    let mut picked = Vec::with_capacity(k.min(pool.len()));

    while picked.len() < k && !pool.is_empty() {
        let total: f64 = pool.iter().map(|(_, weight)| weight).sum();
        if total <= 0.0 {
            break;
        }

        let draw = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        // Float rounding can leave the scan short of `draw`; fall back to the last item.
        let mut chosen = pool.len() - 1;
        for (i, (_, weight)) in pool.iter().enumerate() {
            cumulative += weight;
            if cumulative >= draw {
                chosen = i;
                break;
            }
        }

        picked.push(pool.remove(chosen).0);
    }

    picked
}

#[derive(Debug)]
pub struct CategorySelection {
    pub questions: Vec<Question>,
    pub injected: usize,
}

/// Pick `min(target, candidates.len())` questions for one category.
pub fn select_for_category<R>(
    mut candidates: Vec<Candidate>,
    target: usize,
    rng: &mut R,
) -> CategorySelection
where
    R: Rng + ?Sized,
{
    candidates.shuffle(rng);

    let weak: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, weakness_weight(&c.stat)))
        .filter(|(_, weight)| *weight > 0.0)
        .collect();
    let inject = weak_injection_count(target, weak.len());
    let weak_picks = weighted_sample(weak, inject, rng);

    // After the shuffle the baseline is simply the first `target` candidates.
    let mut selection: Vec<usize> = (0..target.min(candidates.len())).collect();
    let mut injected_slots: Vec<usize> = Vec::new();

    for candidate in weak_picks {
        if selection.contains(&candidate) {
            continue;
        }
        let free: Vec<usize> = (0..selection.len())
            .filter(|slot| !injected_slots.contains(slot))
            .collect();
        let Some(&slot) = free.choose(rng) else {
            break;
        };
        selection[slot] = candidate;
        injected_slots.push(slot);
    }

    let mut pool: Vec<Option<Question>> = candidates
        .into_iter()
        .map(|c| Some(c.question))
        .collect();
    let questions = selection
        .into_iter()
        .filter_map(|i| pool[i].take())
        .collect();

    CategorySelection {
        questions,
        injected: injected_slots.len(),
    }
}

/// Reorder options so that new position `p` holds old option `order[p]`,
/// moving the answer letter with the correct option.
///
/// Returns `false` and leaves the question untouched when the stored letter
/// does not address one of its options.
pub fn apply_option_order(question: &mut Question, order: &[usize]) -> bool {
    let len = question.options.len();
    if len > LETTERS.len() || order.len() != len {
        return false;
    }
    let Some(correct) = letter_to_index(&question.correct_answer, len) else {
        return false;
    };
    let Some(new_index) = order.iter().position(|&old| old == correct) else {
        return false;
    };
    let Some(letter) = index_to_letter(new_index) else {
        return false;
    };

    let mut old: Vec<Option<String>> = std::mem::take(&mut question.options)
        .into_iter()
        .map(Some)
        .collect();
    question.options = order.iter().filter_map(|&i| old[i].take()).collect();
    question.correct_answer = letter;
    true
}

pub fn shuffle_options<R>(question: &mut Question, rng: &mut R) -> bool
where
    R: Rng + ?Sized,
{
    let mut order: Vec<usize> = (0..question.options.len()).collect();
    order.shuffle(rng);
    apply_option_order(question, &order)
}

/// Run selection over every category in table order, then shuffle options.
pub fn assemble<R>(pools: Vec<(&CategoryConfig, Vec<Candidate>)>, rng: &mut R) -> Vec<Question>
where
    R: Rng + ?Sized,
{
    let mut questions = Vec::new();

    for (category, candidates) in pools {
        if candidates.is_empty() {
            tracing::info!("category {} has no questions for this group, skipping", category.name);
            continue;
        }

        let available = candidates.len();
        let selection = select_for_category(candidates, category.count, rng);
        tracing::debug!(
            "category {}: {} of {} selected ({} weak)",
            category.name,
            selection.questions.len(),
            available,
            selection.injected
        );
        questions.extend(selection.questions);
    }

    for question in &mut questions {
        if !shuffle_options(question, rng) {
            tracing::warn!(
                "question {} has answer {:?} outside its {} options, returning unshuffled",
                question.id,
                question.correct_answer,
                question.options.len()
            );
        }
    }

    questions
}

pub async fn fetch_candidates(
    conn: &mut SqliteConnection,
    user_id: &str,
    group: &str,
    category: &str,
) -> AppResult<Vec<Candidate>> {
    let rows: Vec<CandidateRow> = sqlx::query_as(
        r#"
        SELECT q.id, q.category, q.group_codes, q.text, q.options, q.correct_answer,
               q.image_url, q.difficulty, q.explanation, q.points,
               COALESCE(s.correct_count, 0) AS correct_count,
               COALESCE(s.wrong_count, 0) AS wrong_count
        FROM questions q
        LEFT JOIN question_stats s ON s.question_id = q.id AND s.user_id = ?
        WHERE q.category = ?
          AND EXISTS (SELECT 1 FROM json_each(q.group_codes) WHERE json_each.value = ?)
        ORDER BY q.id
        "#,
    )
    .bind(user_id)
    .bind(category)
    .bind(group)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| Candidate::try_from(row).map_err(AppError::from))
        .collect()
}

pub fn normalize_group(group: Option<&str>) -> AppResult<String> {
    let group = group.map(|g| g.trim().to_uppercase()).unwrap_or_default();
    if group.is_empty() {
        return Err(AppError::InvalidArgument("Group is required".to_string()));
    }
    Ok(group)
}

/// Assemble a test for `user_id` and persist it with its question set.
pub async fn start_test(
    db: &SqlitePool,
    user_id: &str,
    group: Option<&str>,
) -> AppResult<StartTestResponse> {
    let group = normalize_group(group)?;

    // Candidate reads run outside the write transaction.
    let mut pools = Vec::with_capacity(CATEGORIES.len());
    {
        let mut conn = db.acquire().await?;
        for category in CATEGORIES {
            let candidates = fetch_candidates(&mut *conn, user_id, &group, category.name).await?;
            pools.push((category, candidates));
        }
    }

    let questions = assemble(pools, &mut rand::thread_rng());

    let mut tx = db.begin().await?;

    let test_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO tests (id, user_id, group_code, score, total_questions, time_taken, is_passed, created_at)
        VALUES (?, ?, ?, 0, ?, 0, false, ?)
        "#,
    )
    .bind(&test_id)
    .bind(user_id)
    .bind(&group)
    .bind(questions.len() as i64)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for (position, question) in questions.iter().enumerate() {
        sqlx::query("INSERT INTO test_questions (test_id, question_id, position) VALUES (?, ?, ?)")
            .bind(&test_id)
            .bind(&question.id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "started test {} for user {} (group {}, {} of {} questions)",
        test_id,
        user_id,
        group,
        questions.len(),
        nominal_total()
    );

    Ok(StartTestResponse { test_id, questions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::insert_question;
    use crate::db::{file_test_pool, test_pool};
    use crate::models::QuestionInput;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn question(id: &str, options: &[&str], correct: &str) -> Question {
        Question {
            id: id.to_string(),
            category: "traffic_rules".to_string(),
            groups: vec!["B".to_string()],
            text: format!("Question {}", id),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_answer: correct.to_string(),
            image_url: None,
            difficulty: "medium".to_string(),
            explanation: String::new(),
            points: 1,
        }
    }

    fn candidate(id: &str, correct_count: i64, wrong_count: i64) -> Candidate {
        Candidate {
            question: question(id, &["A1", "B1", "C1"], "A"),
            stat: QuestionStat {
                correct_count,
                wrong_count,
            },
        }
    }

    fn fresh(n: usize) -> Vec<Candidate> {
        (0..n).map(|i| candidate(&format!("q{}", i), 0, 0)).collect()
    }

    #[test]
    fn test_weakness_weight() {
        let weak = QuestionStat {
            correct_count: 1,
            wrong_count: 9,
        };
        assert!((weakness_weight(&weak) - 0.9 * 11f64.ln()).abs() < 1e-9);
        assert_eq!(weakness_weight(&QuestionStat::default()), 0.0);
        assert_eq!(
            weakness_weight(&QuestionStat {
                correct_count: 5,
                wrong_count: 0
            }),
            0.0
        );
    }

    #[test]
    fn test_weak_injection_count_bounds() {
        assert_eq!(weak_injection_count(8, 5), 1);
        assert_eq!(weak_injection_count(10, 5), 2);
        assert_eq!(weak_injection_count(40, 5), 2);
        assert_eq!(weak_injection_count(4, 5), 0);
        assert_eq!(weak_injection_count(1, 5), 0);
        assert_eq!(weak_injection_count(10, 1), 1);
        assert_eq!(weak_injection_count(10, 0), 0);
    }

    #[test]
    fn test_weighted_sample_is_without_replacement() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = vec![("a", 1.0), ("b", 2.0), ("c", 3.0)];
        let mut picked = weighted_sample(pool, 5, &mut rng);
        picked.sort();
        assert_eq!(picked, vec!["a", "b", "c"]);

        let empty: Vec<(&str, f64)> = Vec::new();
        assert!(weighted_sample(empty, 2, &mut rng).is_empty());
    }

    #[test]
    fn test_weighted_sample_prefers_heavy_items() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut heavy = 0;
        for _ in 0..1000 {
            let pool = vec![("light", 1.0), ("heavy", 9.0)];
            if weighted_sample(pool, 1, &mut rng) == vec!["heavy"] {
                heavy += 1;
            }
        }
        assert!(heavy > 850, "heavy picked {} times", heavy);
    }

    #[test]
    fn test_small_category_takes_everything() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut candidates = fresh(3);
        candidates[0].stat = QuestionStat {
            correct_count: 0,
            wrong_count: 4,
        };
        let selection = select_for_category(candidates, 8, &mut rng);
        let ids: HashSet<_> = selection.questions.iter().map(|q| q.id.clone()).collect();
        assert_eq!(selection.questions.len(), 3);
        assert_eq!(ids.len(), 3);
        assert_eq!(selection.injected, 0);
    }

    #[test]
    fn test_selection_size_bounds_and_uniqueness() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut candidates = fresh(20);
            for (i, c) in candidates.iter_mut().enumerate().take(6) {
                c.stat = QuestionStat {
                    correct_count: i as i64,
                    wrong_count: 3,
                };
            }

            let selection = select_for_category(candidates, 10, &mut rng);
            let ids: HashSet<_> = selection.questions.iter().map(|q| q.id.clone()).collect();
            assert_eq!(selection.questions.len(), 10);
            assert_eq!(ids.len(), 10, "duplicate question with seed {}", seed);
            assert!(selection.injected <= weak_injection_count(10, 6));
        }
    }

    #[test]
    fn test_no_injection_without_weak_history() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut candidates = fresh(12);
        candidates[0].stat = QuestionStat {
            correct_count: 7,
            wrong_count: 0,
        };
        let selection = select_for_category(candidates, 8, &mut rng);
        assert_eq!(selection.questions.len(), 8);
        assert_eq!(selection.injected, 0);
    }

    #[test]
    fn test_weak_question_is_usually_injected() {
        let mut rng = StdRng::seed_from_u64(5);
        let trials = 500;
        let mut weak_hits = 0;
        let mut mild_hits = 0;

        for _ in 0..trials {
            let mut candidates = fresh(20);
            candidates[0] = candidate("weak", 1, 9);
            for (i, c) in candidates.iter_mut().enumerate().skip(1).take(3) {
                *c = candidate(&format!("mild{}", i), 9, 1);
            }

            let selection = select_for_category(candidates, 8, &mut rng);
            if selection.questions.iter().any(|q| q.id == "weak") {
                weak_hits += 1;
            }
            if selection.questions.iter().any(|q| q.id == "mild1") {
                mild_hits += 1;
            }
        }

        assert!(weak_hits > trials * 7 / 10, "weak present {} / {}", weak_hits, trials);
        assert!(weak_hits > mild_hits);
    }

    #[test]
    fn test_option_order_remaps_letter() {
        let mut q = question("q1", &["Wrong1", "Right", "Wrong2"], "B");
        assert!(apply_option_order(&mut q, &[1, 2, 0]));
        assert_eq!(q.options, vec!["Right", "Wrong2", "Wrong1"]);
        assert_eq!(q.correct_answer, "A");
        assert_eq!(q.options[0], "Right");
    }

    #[test]
    fn test_inconsistent_answer_is_left_untouched() {
        let mut q = question("q1", &["One", "Two", "Three"], "D");
        let before = q.clone();
        let mut rng = StdRng::seed_from_u64(6);
        assert!(!shuffle_options(&mut q, &mut rng));
        assert_eq!(q, before);
    }

    #[test]
    fn test_shuffle_is_a_permutation_that_tracks_the_answer() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let original = question("q1", &["Alpha", "Beta", "Gamma", "Delta"], "C");
            let mut q = original.clone();
            assert!(shuffle_options(&mut q, &mut rng));

            let mut before = original.options.clone();
            let mut after = q.options.clone();
            before.sort();
            after.sort();
            assert_eq!(before, after);

            let index = letter_to_index(&q.correct_answer, q.options.len()).unwrap();
            assert_eq!(q.options[index], "Gamma");
        }
    }

    #[test]
    fn test_assemble_skips_empty_categories() {
        let mut rng = StdRng::seed_from_u64(7);
        let pools = vec![
            (&CATEGORIES[0], fresh(20)),
            (&CATEGORIES[1], Vec::new()),
            (&CATEGORIES[2], Vec::new()),
        ];
        let questions = assemble(pools, &mut rng);
        assert_eq!(questions.len(), CATEGORIES[0].count);
    }

    fn input(category: &str, groups: &[&str]) -> QuestionInput {
        QuestionInput {
            category: category.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            text: "Which vehicle goes first?".to_string(),
            options: vec!["Red".into(), "Blue".into(), "Green".into()],
            correct_answer: "B".to_string(),
            image_url: None,
            difficulty: "medium".to_string(),
            explanation: String::new(),
            points: 1,
        }
    }

    #[tokio::test]
    async fn test_start_test_persists_assembled_set() {
        let pool = test_pool().await;
        // traffic_rules target 8, first_aid target 2
        for _ in 0..12 {
            insert_question(&pool, &input("traffic_rules", &["B"])).await.unwrap();
        }
        insert_question(&pool, &input("first_aid", &["B", "C"])).await.unwrap();
        for _ in 0..5 {
            insert_question(&pool, &input("first_aid", &["C"])).await.unwrap();
        }

        let response = start_test(&pool, "user-1", Some(" b ")).await.unwrap();
        assert_eq!(response.questions.len(), 8 + 1);

        let ids: HashSet<_> = response.questions.iter().map(|q| q.id.clone()).collect();
        assert_eq!(ids.len(), response.questions.len());
        assert!(response
            .questions
            .iter()
            .all(|q| q.groups.contains(&"B".to_string())));

        let (rows,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM test_questions WHERE test_id = ?")
                .bind(&response.test_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rows as usize, response.questions.len());

        let (total, score, group): (i64, i64, String) = sqlx::query_as(
            "SELECT total_questions, score, group_code FROM tests WHERE id = ?",
        )
        .bind(&response.test_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(total as usize, response.questions.len());
        assert_eq!(score, 0);
        assert_eq!(group, "B");

        for q in &response.questions {
            let index = letter_to_index(&q.correct_answer, q.options.len()).unwrap();
            assert_eq!(q.options[index], "Blue");
        }
    }

    #[tokio::test]
    async fn test_start_test_with_empty_bank() {
        let pool = test_pool().await;
        let response = start_test(&pool, "user-1", Some("B")).await.unwrap();
        assert!(response.questions.is_empty());
    }

    #[tokio::test]
    async fn test_start_test_requires_group() {
        let pool = test_pool().await;
        let err = start_test(&pool, "user-1", Some("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let err = start_test(&pool, "user-1", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let (tests,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tests, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_all_succeed() {
        let (_dir, pool) = file_test_pool().await;
        for category in CATEGORIES {
            for _ in 0..15 {
                insert_question(&pool, &input(category.name, &["B"])).await.unwrap();
            }
        }

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let user_id = format!("user-{}", i % 3);
                    start_test(&pool, &user_id, Some("B")).await
                })
            })
            .collect();

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.questions.len(), nominal_total());
        }

        let (tests,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tests, 20);

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM test_questions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows as usize, 20 * nominal_total());
    }
}
