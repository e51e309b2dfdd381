use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use crate::models::{Course, CourseGroup, Quiz, QuizAttempt, UNSPECIFIED_END};
use crate::utils::error::ReportError;

pub const FINISHED_STATE: &str = "finished";

// Moodle answers failures with HTTP 200 and an object carrying `exception`.
pub fn reject_api_error(value: Value) -> Result<Value, ReportError> {
    match value.get("exception") {
        Some(_) => Err(ReportError::Api {
            code: text_of(value.get("errorcode")).unwrap_or_else(|| "unknown".to_string()),
            message: text_of(value.get("message")).unwrap_or_default(),
        }),
        None => Ok(value),
    }
}

pub fn as_array(value: &Value) -> Result<&[Value], ReportError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ReportError::Malformed(format!("expected a list, got {}", kind_of(value))))
}

pub fn array_field<'a>(value: &'a Value, key: &'static str) -> Result<&'a [Value], ReportError> {
    as_array(value.get(key).ok_or(ReportError::MissingField(key))?)
}

pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ReportError> {
    Ok(T::deserialize(value)?)
}

// Null, missing, empty or zero-like values count as "no data".
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

pub fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn loose_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ReportError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| ReportError::InvalidInput(format!("bad date {:?}: {}", raw, e)))
}

pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn epoch_of(date: NaiveDate) -> i64 {
    midnight(date).and_utc().timestamp()
}

pub fn datetime_of(timestamp: i64) -> Result<NaiveDateTime, ReportError> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ReportError::Malformed(format!("timestamp {} out of range", timestamp)))
}

#[derive(Debug, Deserialize)]
pub struct RawUser {
    pub id: Option<i64>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub fullname: Option<String>,
}

impl RawUser {
    pub fn display_name(&self) -> Result<(i64, String), ReportError> {
        let id = self.id.ok_or(ReportError::MissingField("id"))?;
        let joined = [self.firstname.as_deref(), self.lastname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !joined.is_empty() {
            return Ok((id, joined));
        }
        match self.fullname.as_deref().map(str::trim) {
            Some(full) if !full.is_empty() => Ok((id, full.to_string())),
            _ => Err(ReportError::MissingField("firstname")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawCourse {
    pub id: Option<i64>,
    pub fullname: Option<String>,
    pub startdate: Option<i64>,
    pub enddate: Option<i64>,
}

// A course carrying the fields required to place it in a reporting window.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRecord {
    pub id: i64,
    pub name: String,
    pub start: i64,
    // None when the course is open-ended (absent or zero on the wire).
    pub end: Option<i64>,
}

impl CourseRecord {
    pub fn decode(value: &Value) -> Result<Self, ReportError> {
        let raw: RawCourse = decode(value)?;
        Ok(CourseRecord {
            id: raw.id.ok_or(ReportError::MissingField("id"))?,
            name: raw.fullname.ok_or(ReportError::MissingField("fullname"))?,
            start: raw.startdate.ok_or(ReportError::MissingField("startdate"))?,
            end: raw.enddate.filter(|&end| end != 0),
        })
    }

    pub fn in_window(&self, from: i64, to: i64) -> bool {
        self.start >= from && self.end.map_or(true, |end| end <= to)
    }

    pub fn into_course(self) -> Result<Course, ReportError> {
        let start_date = datetime_of(self.start)?.format("%Y-%m-%d").to_string();
        let end_date = match self.end {
            Some(end) => datetime_of(end)?.format("%Y-%m-%d").to_string(),
            None => UNSPECIFIED_END.to_string(),
        };
        Ok(Course { id: self.id, name: self.name, start_date, end_date })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawUserGrades {
    pub userid: Option<i64>,
    pub userfullname: Option<String>,
    #[serde(default)]
    pub gradeitems: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGradeItem {
    pub id: i64,
    pub itemname: Option<String>,
    pub itemtype: Option<String>,
    pub grademax: Option<Value>,
    pub gradedatesubmitted: Option<Value>,
    pub gradeformatted: Option<Value>,
    pub percentageformatted: Option<Value>,
}

impl RawGradeItem {
    // Submission timestamp, `None` for undated items.
    pub fn submitted_at(&self) -> Result<Option<i64>, ReportError> {
        match &self.gradedatesubmitted {
            None => Ok(None),
            Some(value) if is_blank(value) => Ok(None),
            Some(value) => loose_i64(value).map(Some).ok_or_else(|| {
                ReportError::Malformed(format!("gradedatesubmitted is {}", kind_of(value)))
            }),
        }
    }

    pub fn max_grade(&self) -> f64 {
        self.grademax.as_ref().and_then(loose_f64).unwrap_or(0.0)
    }

    pub fn grade_text(&self) -> String {
        text_of(self.gradeformatted.as_ref()).unwrap_or_else(|| "-".to_string())
    }

    pub fn percentage_text(&self) -> String {
        text_of(self.percentageformatted.as_ref()).unwrap_or_else(|| "-".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct RawQuiz {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub grade: Option<Value>,
}

impl RawQuiz {
    pub fn into_quiz(self) -> Result<Quiz, ReportError> {
        Ok(Quiz {
            id: self.id.ok_or(ReportError::MissingField("id"))?,
            name: self.name.ok_or(ReportError::MissingField("name"))?,
            max_grade: self.grade.as_ref().and_then(loose_f64),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawAttempt {
    pub quiz: Option<i64>,
    pub state: Option<String>,
    pub sumgrades: Option<Value>,
}

impl RawAttempt {
    pub fn is_finished(&self) -> bool {
        self.state.as_deref() == Some(FINISHED_STATE)
    }

    pub fn into_attempt(self, requested_quiz: i64) -> QuizAttempt {
        let raw_grade = self.sumgrades.as_ref().and_then(loose_f64);
        QuizAttempt {
            quiz_id: self.quiz.unwrap_or(requested_quiz),
            raw_grade,
            grade: raw_grade.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawGroupMembers {
    pub groupid: Option<i64>,
    #[serde(default)]
    pub userids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawGroup {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl RawGroup {
    pub fn into_group(self) -> Result<CourseGroup, ReportError> {
        Ok(CourseGroup {
            id: self.id.ok_or(ReportError::MissingField("id"))?,
            name: self.name.ok_or(ReportError::MissingField("name"))?,
        })
    }
}
