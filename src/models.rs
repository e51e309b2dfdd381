use std::fmt;
use chrono::NaiveDate;
use serde::Serialize;

pub const UNSPECIFIED_END: &str = "unspecified";
pub const UNSPECIFIED_DATE: &str = "date unspecified";
pub const INTERIM_NOTE: &str = "Items without a submission date are included in the report";

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CourseList {
    pub courses: Vec<Course>,
    pub count: usize,
}

// Submission date of a grade item; undated items are always reported.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ItemDate {
    Unspecified,
    On(NaiveDate),
}

impl fmt::Display for ItemDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemDate::Unspecified => f.write_str(UNSPECIFIED_DATE),
            ItemDate::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct GradeItem {
    pub id: i64,
    pub name: String,
    pub item_type: String,
    pub max_grade: f64,
    pub date: ItemDate,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentGrade {
    pub item: String,
    pub grade: String,
    pub percentage: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentGradeRecord {
    pub user_id: i64,
    pub full_name: String,
    pub grades: Vec<StudentGrade>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

// Snapshot of student grades for the assessment items falling within a period.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct InterimReport {
    pub course_id: i64,
    pub items: Vec<GradeItem>,
    pub students: Vec<StudentGradeRecord>,
    pub period: Period,
    pub note: String,
}

impl InterimReport {
    // First qualifying item carrying the given display name.
    pub fn item_by_name(&self, name: &str) -> Option<&GradeItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Quiz {
    pub id: i64,
    pub name: String,
    pub max_grade: Option<f64>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct QuizAttempt {
    pub quiz_id: i64,
    pub raw_grade: Option<f64>,
    pub grade: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentResult {
    pub user_id: i64,
    pub name: String,
    pub best_grade: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CourseGroup {
    pub id: i64,
    pub name: String,
}

// Inputs accepted by the combined report export.
#[derive(Debug, Clone)]
pub enum ReportData {
    Courses(CourseList),
    Interim(InterimReport),
}

impl From<CourseList> for ReportData {
    fn from(list: CourseList) -> Self {
        ReportData::Courses(list)
    }
}

impl From<InterimReport> for ReportData {
    fn from(report: InterimReport) -> Self {
        ReportData::Interim(report)
    }
}
