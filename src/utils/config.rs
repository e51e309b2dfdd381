use std::env;
use anyhow::{Context, Result};
use log::warn;

// Web-service credentials for a Moodle instance.
#[derive(Debug, Clone, Default)]
pub struct MoodleConfig {
    pub url: String,
    pub token: String,
}

impl MoodleConfig {
    // Missing values are not fatal; calls against an empty url or token fail remotely.
    pub fn from_env() -> Self {
        let url = env::var("MOODLE_URL").unwrap_or_else(|_| {
            warn!("MOODLE_URL environment variable not found");
            String::new()
        });
        let token = env::var("MOODLE_TOKEN").unwrap_or_else(|_| {
            warn!("MOODLE_TOKEN environment variable not found");
            String::new()
        });

        MoodleConfig { url, token }
    }
}

// Which reports to produce and for what.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportJob {
    pub start_date: String,
    pub end_date: String,
    pub teacher_id: Option<i64>,
    pub teacher_email: Option<String>,
    pub course_id: Option<i64>,
    pub group_id: Option<i64>,
    pub quiz_ids: Vec<i64>,
    pub courses_file: String,
    pub interim_file: String,
    pub results_file: String,
}

impl ReportJob {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let id = |key: &str| -> Result<Option<i64>> {
            lookup(key)
                .map(|v| v.trim().parse::<i64>().with_context(|| format!("{} must be a number", key)))
                .transpose()
        };

        let quiz_ids = match lookup("REPORT_QUIZ_IDS") {
            Some(raw) => parse_id_list(&raw).context("REPORT_QUIZ_IDS must be comma-separated numbers")?,
            None => Vec::new(),
        };

        Ok(ReportJob {
            start_date: or("REPORT_START", "2024-01-01"),
            end_date: or("REPORT_END", "2026-01-01"),
            teacher_id: id("REPORT_TEACHER_ID")?,
            teacher_email: lookup("REPORT_TEACHER_EMAIL"),
            course_id: id("REPORT_COURSE_ID")?,
            group_id: id("REPORT_GROUP_ID")?,
            quiz_ids,
            courses_file: or("REPORT_COURSES_FILE", "courses.xlsx"),
            interim_file: or("REPORT_INTERIM_FILE", "interim.xlsx"),
            results_file: or("REPORT_RESULTS_FILE", "results.xlsx"),
        })
    }
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}
