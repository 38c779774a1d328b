use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Option letters, indexed by option position.
pub const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Map a stored answer letter onto an index into `option_count` options.
pub fn letter_to_index(letter: &str, option_count: usize) -> Option<usize> {
    let letter = letter.trim();
    if letter.len() != 1 {
        return None;
    }
    let byte = letter.as_bytes()[0].to_ascii_uppercase();
    let index = LETTERS.iter().position(|&l| l == byte)?;
    (index < option_count).then_some(index)
}

pub fn index_to_letter(index: usize) -> Option<String> {
    LETTERS.get(index).map(|&b| (b as char).to_string())
}

// ============================================================================
// Questions
// ============================================================================

/// Raw `questions` row; list columns are stored as JSON text.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: String,
    pub category: String,
    pub group_codes: String,
    pub text: String,
    pub options: String,
    pub correct_answer: String,
    pub image_url: Option<String>,
    pub difficulty: String,
    pub explanation: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub category: String,
    pub groups: Vec<String>,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub image_url: Option<String>,
    pub difficulty: String,
    pub explanation: String,
    pub points: i64,
}

impl TryFrom<QuestionRow> for Question {
    type Error = serde_json::Error;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            groups: serde_json::from_str(&row.group_codes)?,
            options: serde_json::from_str(&row.options)?,
            id: row.id,
            category: row.category,
            text: row.text,
            correct_answer: row.correct_answer,
            image_url: row.image_url,
            difficulty: row.difficulty,
            explanation: row.explanation,
            points: row.points,
        })
    }
}

/// A user's accumulated answer history on one question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestionStat {
    pub correct_count: i64,
    pub wrong_count: i64,
}

impl QuestionStat {
    pub fn attempts(&self) -> i64 {
        self.correct_count + self.wrong_count
    }

    /// Share of wrong answers, zero when never attempted.
    pub fn weakness_ratio(&self) -> f64 {
        let attempts = self.attempts();
        if attempts <= 0 {
            return 0.0;
        }
        self.wrong_count as f64 / attempts as f64
    }
}

/// Question row joined with the requesting user's stat (zeros when absent).
#[derive(Debug, Clone, FromRow)]
pub struct CandidateRow {
    #[sqlx(flatten)]
    pub question: QuestionRow,
    pub correct_count: i64,
    pub wrong_count: i64,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub question: Question,
    pub stat: QuestionStat,
}

impl TryFrom<CandidateRow> for Candidate {
    type Error = serde_json::Error;

    fn try_from(row: CandidateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            question: row.question.try_into()?,
            stat: QuestionStat {
                correct_count: row.correct_count,
                wrong_count: row.wrong_count,
            },
        })
    }
}

/// Admin create/edit payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub category: String,
    pub groups: Vec<String>,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub image_url: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default = "default_points")]
    pub points: i64,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

fn default_points() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct QuestionListQuery {
    pub category: Option<String>,
    pub group: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================================
// Tests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Created,
    Finished,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "group")]
    pub group_code: String,
    pub score: i64,
    pub total_questions: i64,
    pub time_taken: i64,
    pub is_passed: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestRecord {
    pub fn status(&self) -> TestStatus {
        if self.finished_at.is_some() {
            TestStatus::Finished
        } else {
            TestStatus::Created
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartTestRequest {
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestResponse {
    pub test_id: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    pub selected_answer: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTestRequest {
    pub test_id: String,
    pub score: i64,
    pub time_taken: i64,
    pub is_passed: bool,
    #[serde(default)]
    pub user_answers: Vec<UserAnswer>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAnswer {
    pub question_id: String,
    pub selected_answer: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetail {
    #[serde(flatten)]
    pub test: TestRecord,
    pub status: TestStatus,
    pub question_ids: Vec<String>,
    pub answers: Vec<RecordedAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_to_index() {
        assert_eq!(letter_to_index("A", 3), Some(0));
        assert_eq!(letter_to_index("c", 3), Some(2));
        assert_eq!(letter_to_index(" B ", 3), Some(1));
        assert_eq!(letter_to_index("D", 3), None);
        assert_eq!(letter_to_index("", 3), None);
        assert_eq!(letter_to_index("AB", 3), None);
        assert_eq!(letter_to_index("1", 3), None);
    }

    #[test]
    fn test_index_to_letter() {
        assert_eq!(index_to_letter(0).as_deref(), Some("A"));
        assert_eq!(index_to_letter(25).as_deref(), Some("Z"));
        assert_eq!(index_to_letter(26), None);
    }

    #[test]
    fn test_weakness_ratio() {
        assert_eq!(QuestionStat::default().weakness_ratio(), 0.0);
        let stat = QuestionStat {
            correct_count: 1,
            wrong_count: 9,
        };
        assert!((stat.weakness_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_question_from_row_decodes_json_columns() {
        let row = QuestionRow {
            id: "q1".into(),
            category: "road_signs".into(),
            group_codes: r#"["B","C"]"#.into(),
            text: "What does this sign mean?".into(),
            options: r#"["Stop","Yield","No entry"]"#.into(),
            correct_answer: "A".into(),
            image_url: None,
            difficulty: "easy".into(),
            explanation: String::new(),
            points: 1,
        };
        let question = Question::try_from(row).unwrap();
        assert_eq!(question.groups, vec!["B", "C"]);
        assert_eq!(question.options.len(), 3);
    }

    #[test]
    fn test_question_from_row_rejects_corrupt_options() {
        let row = QuestionRow {
            id: "q1".into(),
            category: "road_signs".into(),
            group_codes: r#"["B"]"#.into(),
            text: "?".into(),
            options: "not json".into(),
            correct_answer: "A".into(),
            image_url: None,
            difficulty: "easy".into(),
            explanation: String::new(),
            points: 1,
        };
        assert!(Question::try_from(row).is_err());
    }

    #[test]
    fn test_finish_request_uses_camel_case() {
        let req: FinishTestRequest = serde_json::from_str(
            r#"{"testId":"t1","score":3,"timeTaken":120,"isPassed":false,
                "userAnswers":[{"questionId":"q1","selectedAnswer":"B","isCorrect":true}]}"#,
        )
        .unwrap();
        assert_eq!(req.test_id, "t1");
        assert_eq!(req.user_answers.len(), 1);
        assert!(req.user_answers[0].is_correct);
    }
}
