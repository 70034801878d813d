//! Answer keys, answer-extraction results and scoring.
//!
//! Answer extraction itself is performed by an external service behind the
//! [`AnswerExtractor`] trait. Its responses are untrusted: they are parsed
//! through [`ExtractionResult::from_json`], which maps anything missing or
//! malformed to a blank answer instead of failing or guessing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GradingError {
    #[error("invalid answer '{0}': expected a letter A-E or BLANK")]
    InvalidAnswer(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// No extraction capability is configured or reachable. Callers must not
    /// substitute fabricated answers.
    #[error("answer extraction unavailable: {0}")]
    Unavailable(String),
    #[error("invalid extraction response: {0}")]
    InvalidResponse(String),
}

/// One multiple-choice option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    C,
    D,
    E,
}

impl Choice {
    pub const ALL: [Choice; 5] = [Choice::A, Choice::B, Choice::C, Choice::D, Choice::E];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn letter(self) -> char {
        (b'A' + self as u8) as char
    }

    pub fn from_letter(c: char) -> Option<Self> {
        let idx = (c.to_ascii_uppercase() as u32).checked_sub('A' as u32)?;
        Self::ALL.get(idx as usize).copied()
    }
}

/// A key entry or a student's response to one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Answer {
    Choice(Choice),
    Blank,
}

impl Answer {
    pub fn choice(&self) -> Option<Choice> {
        match self {
            Answer::Choice(c) => Some(*c),
            Answer::Blank => None,
        }
    }
}

impl FromStr for Answer {
    type Err = GradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("blank") || t == "-" {
            return Ok(Answer::Blank);
        }
        let mut chars = t.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Choice::from_letter(c)
                .map(Answer::Choice)
                .ok_or_else(|| GradingError::InvalidAnswer(s.to_string())),
            _ => Err(GradingError::InvalidAnswer(s.to_string())),
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Choice(c) => write!(f, "{}", c.letter()),
            Answer::Blank => f.write_str("BLANK"),
        }
    }
}

impl From<Answer> for String {
    fn from(a: Answer) -> Self {
        a.to_string()
    }
}

impl TryFrom<String> for Answer {
    type Error = GradingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Ordered expected answers, one per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKey(Vec<Answer>);

impl AnswerKey {
    pub fn new(answers: Vec<Answer>) -> Self {
        Self(answers)
    }

    /// Parse single-letter-or-`BLANK` entries.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, GradingError> {
        entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Parse a comma-separated list such as `"A,C,BLANK,D"`.
    pub fn parse_list(list: &str) -> Result<Self, GradingError> {
        if list.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: Vec<&str> = list.split(',').collect();
        Self::parse(&entries)
    }

    pub fn answers(&self) -> &[Answer] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest option letter used anywhere in the key.
    pub fn highest_choice(&self) -> Option<Choice> {
        self.0.iter().filter_map(Answer::choice).max()
    }
}

/// What the extractor is told about the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionContext {
    pub question_count: usize,
    pub options_per_question: usize,
}

/// External answer-extraction capability.
pub trait AnswerExtractor {
    fn analyze(
        &self,
        image: &[u8],
        context: &ExtractionContext,
    ) -> Result<ExtractionResult, ExtractionError>;
}

/// Extractor used when no service is configured.
pub struct UnavailableExtractor;

impl AnswerExtractor for UnavailableExtractor {
    fn analyze(
        &self,
        _image: &[u8],
        _context: &ExtractionContext,
    ) -> Result<ExtractionResult, ExtractionError> {
        Err(ExtractionError::Unavailable(
            "no answer extraction service configured".into(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAnswer {
    pub question_number: usize,
    pub answer: Answer,
    pub confidence: f32,
}

/// Validated extraction output: exactly one entry per question, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub answers: Vec<ExtractedAnswer>,
}

impl ExtractionResult {
    fn blank(question_count: usize) -> Vec<ExtractedAnswer> {
        (1..=question_count)
            .map(|n| ExtractedAnswer {
                question_number: n,
                answer: Answer::Blank,
                confidence: 0.0,
            })
            .collect()
    }

    /// Validate an untrusted response.
    ///
    /// Accepted shapes for `answers` (at the root or under an `"answers"` key):
    /// an array of strings in question order, or an array of objects with
    /// `question` (1-based), `answer` and optional `confidence`. Unparseable
    /// answers become `Blank`, confidences are clamped to [0, 1] (default 0),
    /// out-of-range or repeated question numbers are ignored.
    pub fn from_json(value: &Value, question_count: usize) -> Self {
        let mut answers = Self::blank(question_count);
        let mut seen = vec![false; question_count];

        let entries: &[Value] = match value {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("answers") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        for (pos, entry) in entries.iter().enumerate() {
            let (number, answer, confidence) = match entry {
                Value::String(s) => (Some(pos + 1), s.parse::<Answer>().ok(), None),
                Value::Object(obj) => {
                    let number = ["question", "question_number", "questionNumber"]
                        .iter()
                        .find_map(|k| obj.get(*k))
                        .and_then(question_number);
                    let answer = obj
                        .get("answer")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<Answer>().ok());
                    let confidence = obj.get("confidence").and_then(Value::as_f64);
                    (number, answer, confidence)
                }
                _ => (None, None, None),
            };

            let Some(n) = number.filter(|n| (1..=question_count).contains(n)) else {
                continue;
            };
            if seen[n - 1] {
                continue;
            }
            seen[n - 1] = true;

            let slot = &mut answers[n - 1];
            slot.answer = answer.unwrap_or(Answer::Blank);
            slot.confidence = confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0) as f32)
                .unwrap_or(0.0);
        }

        Self { answers }
    }
}

impl ExtractionResult {
    /// Like [`ExtractionResult::from_json`], but rejects a response that has
    /// no answer list at all instead of treating it as an all-blank sheet.
    pub fn from_response(value: &Value, question_count: usize) -> Result<Self, ExtractionError> {
        let has_answers = match value {
            Value::Array(_) => true,
            Value::Object(map) => matches!(map.get("answers"), Some(Value::Array(_))),
            _ => false,
        };
        if !has_answers {
            return Err(ExtractionError::InvalidResponse(
                "expected an array of answers or an object with an \"answers\" array".into(),
            ));
        }
        Ok(Self::from_json(value, question_count))
    }
}

fn question_number(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    /// Scored question left blank by the student.
    Blank,
    /// Key entry is `BLANK`; the question does not count.
    Unscored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionGrade {
    pub question_number: usize,
    pub expected: Answer,
    pub given: Answer,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub correct: usize,
    pub incorrect: usize,
    pub blank: usize,
    /// Number of scored questions.
    pub total: usize,
    pub score_percent: f32,
    pub per_question: Vec<QuestionGrade>,
}

/// Score extracted answers against the key. Missing extractions count as blank.
pub fn grade(key: &AnswerKey, result: &ExtractionResult) -> GradeReport {
    let mut report = GradeReport {
        correct: 0,
        incorrect: 0,
        blank: 0,
        total: 0,
        score_percent: 0.0,
        per_question: Vec::with_capacity(key.len()),
    };

    for (i, &expected) in key.answers().iter().enumerate() {
        let given = result
            .answers
            .get(i)
            .map(|a| a.answer)
            .unwrap_or(Answer::Blank);
        let outcome = match (expected, given) {
            (Answer::Blank, _) => Outcome::Unscored,
            (_, Answer::Blank) => Outcome::Blank,
            (e, g) if e == g => Outcome::Correct,
            _ => Outcome::Incorrect,
        };
        match outcome {
            Outcome::Correct => report.correct += 1,
            Outcome::Incorrect => report.incorrect += 1,
            Outcome::Blank => report.blank += 1,
            Outcome::Unscored => {}
        }
        if outcome != Outcome::Unscored {
            report.total += 1;
        }
        report.per_question.push(QuestionGrade {
            question_number: i + 1,
            expected,
            given,
            outcome,
        });
    }

    if report.total > 0 {
        report.score_percent = report.correct as f32 * 100.0 / report.total as f32;
    }
    report
}
