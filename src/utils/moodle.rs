use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use url::Url;
use crate::models::{
    CourseGroup, CourseList, GradeItem, InterimReport, ItemDate, Period, Quiz, QuizAttempt,
    StudentGrade, StudentGradeRecord, StudentResult, INTERIM_NOTE,
};
use crate::utils::config::MoodleConfig;
use crate::utils::error::{Batch, ReportError};
use crate::utils::wire::{
    array_field, as_array, datetime_of, decode, epoch_of, is_blank, loose_i64, midnight,
    parse_date, reject_api_error, CourseRecord, RawAttempt, RawGradeItem, RawGroup,
    RawGroupMembers, RawQuiz, RawUser, RawUserGrades,
};

const REST_PATH: &str = "webservice/rest/server.php";

// A single RPC-style web-service call: function name plus flat query parameters.
pub trait Transport {
    async fn call(&self, function: &str, params: &[(String, String)]) -> Result<Value, ReportError>;
}

// Sends every call through one reqwest client so the session is reused.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    // Builds the cookie-keeping reqwest client; the endpoint is resolved per call.
    pub fn new(config: &MoodleConfig) -> Result<Self, ReportError> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(HttpTransport { client, base_url: config.url.clone(), token: config.token.clone() })
    }

    // Base url joined with the REST server path.
    fn endpoint(&self) -> Result<Url, ReportError> {
        let base = Url::parse(&format!("{}/", self.base_url.trim_end_matches('/')))?;
        Ok(base.join(REST_PATH)?)
    }
}

impl Transport for HttpTransport {
    async fn call(&self, function: &str, params: &[(String, String)]) -> Result<Value, ReportError> {
        let response = self.client.get(self.endpoint()?)
            .query(params)
            .query(&[
                ("wstoken", self.token.as_str()),
                ("wsfunction", function),
                ("moodlewsrestformat", "json"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        reject_api_error(body)
    }
}

pub struct MoodleClient<T = HttpTransport> {
    transport: T,
}

impl MoodleClient<HttpTransport> {
    // Client talking to the configured Moodle instance over HTTP.
    pub fn new(config: &MoodleConfig) -> Result<Self, ReportError> {
        Ok(MoodleClient::with_transport(HttpTransport::new(config)?))
    }
}

// Turns fixed key/value pairs into owned query parameters.
fn params<const N: usize>(pairs: [(&str, String); N]) -> Vec<(String, String)> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

// Converts an operation outcome into the "absent on failure" contract.
fn settle<V>(context: &str, outcome: Result<V, ReportError>) -> Option<V> {
    match outcome {
        Ok(value) => Some(value),
        Err(ReportError::Empty(reason)) => {
            info!("{}: {}", context, reason);
            None
        }
        Err(e) => {
            error!("{}: {}", context, e);
            None
        }
    }
}

impl<T: Transport> MoodleClient<T> {
    // Client over any transport, used with scripted responses in tests.
    pub fn with_transport(transport: T) -> Self {
        MoodleClient { transport }
    }

    async fn call(&self, function: &str, params: Vec<(String, String)>) -> Result<Value, ReportError> {
        debug!("Calling {} with {:?}", function, params);
        self.transport.call(function, &params).await
    }

    // Looks a user up by email and returns the first match's id.
    pub async fn get_user_id_by_email(&self, email: &str) -> Option<i64> {
        let outcome = async {
            let response = self.call("core_user_get_users", params([
                ("criteria[0][key]", "email".to_string()),
                ("criteria[0][value]", email.to_string()),
            ])).await?;
            let first = array_field(&response, "users")?
                .first()
                .ok_or_else(|| ReportError::Empty(format!("no user with email {}", email)))?;
            decode::<RawUser>(first)?.id.ok_or(ReportError::MissingField("id"))
        }.await;

        settle("User lookup", outcome)
    }

    // Courses the teacher is enrolled in that start on or after `start_date`
    // and end on or before `end_date` (open-ended courses always qualify).
    pub async fn get_teacher_courses(&self, teacher_id: i64, start_date: &str, end_date: &str) -> Option<CourseList> {
        let outcome = async {
            let start = parse_date(start_date)?;
            let end = parse_date(end_date)?;
            if start > end {
                return Err(ReportError::InvalidInput(format!(
                    "start date {} is after end date {}", start_date, end_date
                )));
            }

            let response = self.call("core_enrol_get_users_courses", params([
                ("userid", teacher_id.to_string()),
            ])).await?;
            Ok::<_, ReportError>(filter_courses(as_array(&response)?, start, end))
        }.await;

        settle("Teacher courses", outcome)
    }

    // Grade items of a course dated within the period (or undated), joined to each student's grades.
    pub async fn track_interim_assessment(&self, course_id: i64, start_date: &str, end_date: &str) -> Option<InterimReport> {
        let outcome = async {
            let period = Period { start: parse_date(start_date)?, end: parse_date(end_date)? };
            let response = self.call("gradereport_user_get_grade_items", params([
                ("courseid", course_id.to_string()),
            ])).await?;
            build_interim_report(course_id, &response, period)
        }.await;

        settle("Interim assessment", outcome)
    }

    // Metadata for the requested quizzes of a course, keyed by quiz id.
    pub async fn get_quizzes(&self, quiz_ids: &[i64], course_id: i64) -> BTreeMap<i64, Quiz> {
        if quiz_ids.is_empty() {
            return BTreeMap::new();
        }

        let outcome = async {
            let response = self.call("mod_quiz_get_quizzes_by_courses", params([
                ("courseids[0]", course_id.to_string()),
            ])).await?;
            let batch: Batch<Quiz> = array_field(&response, "quizzes")?
                .iter()
                .enumerate()
                .map(|(i, raw)| (format!("quiz #{}", i), decode::<RawQuiz>(raw).and_then(RawQuiz::into_quiz)))
                .collect();
            Ok::<BTreeMap<i64, Quiz>, ReportError>(batch.into_logged("Quizzes")
                .into_iter()
                .filter(|quiz| quiz_ids.contains(&quiz.id))
                .map(|quiz| (quiz.id, quiz))
                .collect())
        }.await;

        settle("Quizzes", outcome).unwrap_or_default()
    }

    // Numeric user ids of a group's members, empty on any failure.
    pub async fn get_group_members(&self, group_id: i64) -> Vec<i64> {
        let outcome = async {
            let response = self.call("core_group_get_group_members", params([
                ("groupids[0]", group_id.to_string()),
            ])).await?;
            if is_blank(&response) {
                return Err(ReportError::Empty(format!("group {} has no member data", group_id)));
            }
            member_ids(as_array(&response)?, group_id)
        }.await;

        settle("Group members", outcome).unwrap_or_default()
    }

    // Resolves "first last" display names for a batch of users.
    pub async fn get_student_names(&self, user_ids: &[i64]) -> HashMap<i64, String> {
        if user_ids.is_empty() {
            return HashMap::new();
        }

        let mut query = vec![("field".to_string(), "id".to_string())];
        query.extend(user_ids.iter().enumerate().map(|(i, id)| (format!("values[{}]", i), id.to_string())));

        let outcome = async {
            let response = self.call("core_user_get_users_by_field", query).await?;
            let batch: Batch<(i64, String)> = as_array(&response)?
                .iter()
                .enumerate()
                .map(|(i, raw)| (format!("user #{}", i), decode::<RawUser>(raw).and_then(|u| u.display_name())))
                .collect();
            Ok::<HashMap<i64, String>, ReportError>(batch.into_logged("Student names").into_iter().collect())
        }.await;

        settle("Student names", outcome).unwrap_or_default()
    }

    // Finished attempts of one user across the given quizzes. A quiz whose
    // attempts cannot be fetched is logged and skipped.
    pub async fn get_finished_attempts(&self, user_id: i64, quiz_ids: &[i64]) -> Vec<QuizAttempt> {
        let mut attempts = Vec::new();
        for &quiz_id in quiz_ids {
            let outcome = async {
                let response = self.call("mod_quiz_get_user_attempts", params([
                    ("quizid", quiz_id.to_string()),
                    ("userid", user_id.to_string()),
                    ("status", "all".to_string()),
                ])).await?;
                finished_attempts(array_field(&response, "attempts")?, quiz_id)
            }.await;

            match outcome {
                Ok(found) => attempts.extend(found),
                Err(e) => warn!("Attempts of user {} on quiz {} skipped: {}", user_id, quiz_id, e),
            }
        }
        attempts
    }

    // Best finished-attempt grade of every group member across the quizzes,
    // ordered by display name.
    pub async fn analyze_attempts_results(&self, quiz_ids: &[i64], group_id: i64, course_id: i64) -> Vec<StudentResult> {
        let members = self.get_group_members(group_id).await;
        if members.is_empty() {
            info!("Group {} has no members, nothing to analyze", group_id);
            return Vec::new();
        }

        let quizzes = self.get_quizzes(quiz_ids, course_id).await;
        for id in quiz_ids.iter().filter(|id| !quizzes.contains_key(*id)) {
            warn!("Quiz {} was not found in course {}", id, course_id);
        }

        let names = self.get_student_names(&members).await;
        let mut scored = Vec::with_capacity(members.len());
        for &user_id in &members {
            let attempts = self.get_finished_attempts(user_id, quiz_ids).await;
            scored.push((user_id, names.get(&user_id).cloned(), best_grade(&attempts)));
        }

        rank_results(scored)
    }

    // Groups of a course; malformed entries are logged and dropped.
    pub async fn get_course_groups(&self, course_id: i64) -> Option<Vec<CourseGroup>> {
        let outcome = async {
            let response = self.call("core_group_get_course_groups", params([
                ("courseid", course_id.to_string()),
            ])).await?;
            let batch: Batch<CourseGroup> = as_array(&response)?
                .iter()
                .enumerate()
                .map(|(i, raw)| (format!("group #{}", i), decode::<RawGroup>(raw).and_then(RawGroup::into_group)))
                .collect();
            Ok::<_, ReportError>(batch.into_logged("Course groups"))
        }.await;

        settle("Course groups", outcome)
    }

    // Name of a single group, absent when it cannot be found.
    pub async fn get_group_name(&self, group_id: i64) -> Option<String> {
        let outcome = async {
            let response = self.call("core_group_get_groups", params([
                ("groupids[0]", group_id.to_string()),
            ])).await?;
            let batch: Batch<CourseGroup> = as_array(&response)?
                .iter()
                .enumerate()
                .map(|(i, raw)| (format!("group #{}", i), decode::<RawGroup>(raw).and_then(RawGroup::into_group)))
                .collect();
            batch.into_logged("Group name")
                .into_iter()
                .find(|group| group.id == group_id)
                .map(|group| group.name)
                .ok_or_else(|| ReportError::Empty(format!("group {} not found", group_id)))
        }.await;

        settle("Group name", outcome)
    }
}

// Decodes course records and keeps those inside the window, formatting their dates.
fn filter_courses(records: &[Value], start: NaiveDate, end: NaiveDate) -> CourseList {
    let (from, to) = (epoch_of(start), epoch_of(end));

    let decoded: Batch<CourseRecord> = records
        .iter()
        .enumerate()
        .map(|(i, raw)| (format!("course #{}", i), CourseRecord::decode(raw)))
        .collect();
    let formatted: Batch<_> = decoded
        .into_logged("Teacher courses")
        .into_iter()
        .filter(|course| course.in_window(from, to))
        .map(|course| (format!("course {}", course.id), course.into_course()))
        .collect();

    let courses = formatted.into_logged("Teacher courses");
    let count = courses.len();
    CourseList { courses, count }
}

struct UserGrades {
    user_id: Option<i64>,
    full_name: Option<String>,
    items: Vec<RawGradeItem>,
}

// Bundles the qualifying items and per-student grades of a grade-items response.
fn build_interim_report(course_id: i64, response: &Value, period: Period) -> Result<InterimReport, ReportError> {
    if is_blank(response) {
        return Err(ReportError::Empty("the API returned no data".to_string()));
    }
    let raw_users = match response.get("usergrades") {
        Some(users) if !is_blank(users) => as_array(users)?,
        _ => return Err(ReportError::Empty("no student grade data".to_string())),
    };

    let users: Vec<UserGrades> = raw_users
        .iter()
        .enumerate()
        .map(|(i, raw)| (format!("student #{}", i), decode_user_grades(raw)))
        .collect::<Batch<_>>()
        .into_logged("Interim assessment");

    let items = qualifying_items(&users, &period);
    if items.is_empty() {
        return Err(ReportError::Empty("no assessment items fall within the period".to_string()));
    }

    let students = users
        .iter()
        .map(|user| {
            let label = match user.user_id {
                Some(id) => format!("student {}", id),
                None => "student without id".to_string(),
            };
            (label, join_student_grades(user, &items))
        })
        .collect::<Batch<_>>()
        .into_logged("Interim assessment");

    Ok(InterimReport {
        course_id,
        items,
        students,
        period,
        note: INTERIM_NOTE.to_string(),
    })
}

// One student's record with its decodable grade items.
fn decode_user_grades(value: &Value) -> Result<UserGrades, ReportError> {
    let raw: RawUserGrades = decode(value)?;
    let context = format!("Grade items of user {:?}", raw.userid);
    let items = raw.gradeitems
        .iter()
        .enumerate()
        .map(|(i, item)| (format!("item #{}", i), decode::<RawGradeItem>(item)))
        .collect::<Batch<_>>()
        .into_logged(&context);

    Ok(UserGrades { user_id: raw.userid, full_name: raw.userfullname, items })
}

// Grade items deduplicated by id across all users (first occurrence wins),
// kept when undated or submitted within the period.
fn qualifying_items(users: &[UserGrades], period: &Period) -> Vec<GradeItem> {
    let mut seen = HashSet::new();
    let unique = users
        .iter()
        .flat_map(|user| user.items.iter())
        .filter(|item| seen.insert(item.id));

    let (from, to) = (midnight(period.start), midnight(period.end));
    let mut batch = Batch::default();
    for item in unique {
        let name = match item.itemname.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };

        let dated = item.submitted_at().and_then(|ts| match ts {
            None => Ok(Some(ItemDate::Unspecified)),
            Some(ts) => {
                let submitted = datetime_of(ts)?;
                Ok((from <= submitted && submitted <= to).then(|| ItemDate::On(submitted.date())))
            }
        });

        match dated {
            Ok(Some(date)) => batch.push(format!("item {}", item.id), Ok(GradeItem {
                id: item.id,
                name: name.to_string(),
                item_type: item.itemtype.clone().unwrap_or_else(|| "unknown".to_string()),
                max_grade: item.max_grade(),
                date,
            })),
            Ok(None) => {}
            Err(e) => batch.push(format!("item {}", item.id), Err(e)),
        }
    }
    batch.into_logged("Interim assessment")
}

// Grade and percentage of each qualifying item the student has a record for.
fn join_student_grades(user: &UserGrades, items: &[GradeItem]) -> Result<StudentGradeRecord, ReportError> {
    let user_id = user.user_id.ok_or(ReportError::MissingField("userid"))?;
    let full_name = user.full_name.clone().ok_or(ReportError::MissingField("userfullname"))?;

    let grades = items
        .iter()
        .filter_map(|item| {
            user.items.iter().find(|raw| raw.id == item.id).map(|raw| StudentGrade {
                item: item.name.clone(),
                grade: raw.grade_text(),
                percentage: raw.percentage_text(),
            })
        })
        .collect();

    Ok(StudentGradeRecord { user_id, full_name, grades })
}

// User ids listed for the group, skipping non-numeric entries.
fn member_ids(entries: &[Value], group_id: i64) -> Result<Vec<i64>, ReportError> {
    let mut ids = Vec::new();
    for entry in entries {
        let members: RawGroupMembers = decode(entry)?;
        if members.groupid.is_some_and(|id| id != group_id) {
            continue;
        }
        for raw in &members.userids {
            match loose_i64(raw) {
                Some(id) => ids.push(id),
                None => warn!("Group {}: skipped non-numeric member id {}", group_id, raw),
            }
        }
    }
    Ok(ids)
}

// Attempts in the finished state, with grades normalized.
fn finished_attempts(raw: &[Value], quiz_id: i64) -> Result<Vec<QuizAttempt>, ReportError> {
    let batch: Batch<RawAttempt> = raw
        .iter()
        .enumerate()
        .map(|(i, attempt)| (format!("attempt #{}", i), decode(attempt)))
        .collect();

    Ok(batch.into_logged(&format!("Quiz {}", quiz_id))
        .into_iter()
        .filter(RawAttempt::is_finished)
        .map(|attempt| attempt.into_attempt(quiz_id))
        .collect())
}

// Highest grade among the attempts, 0.0 when there are none.
fn best_grade(attempts: &[QuizAttempt]) -> f64 {
    attempts.iter().map(|attempt| attempt.grade).fold(0.0, f64::max)
}

// Leading `local@domain` token of a name.
fn email_placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*([^\s@]+)@[^\s@]+").expect("email pattern is valid"))
}

// Accounts created from an email often carry it as their name; keep the local part.
pub fn clean_display_name(name: &str) -> String {
    match email_placeholder().captures(name) {
        Some(caps) => caps[1].to_string(),
        None => name.trim().to_string(),
    }
}

// Results with cleaned names, sorted by name.
fn rank_results(scored: Vec<(i64, Option<String>, f64)>) -> Vec<StudentResult> {
    let mut results: Vec<StudentResult> = scored
        .into_iter()
        .map(|(user_id, name, best_grade)| StudentResult {
            user_id,
            name: name.map_or_else(|| format!("user {}", user_id), |n| clean_display_name(&n)),
            best_grade,
        })
        .collect();
    results.sort_by(|a, b| a.name.cmp(&b.name));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use serde_json::json;

    type Handler = Box<dyn Fn(&str, &HashMap<String, String>) -> Result<Value, ReportError>>;

    struct Scripted {
        handler: Handler,
        calls: RefCell<Vec<String>>,
    }

    impl Transport for Scripted {
        async fn call(&self, function: &str, params: &[(String, String)]) -> Result<Value, ReportError> {
            self.calls.borrow_mut().push(function.to_string());
            let params: HashMap<String, String> = params.iter().cloned().collect();
            (self.handler)(function, &params)
        }
    }

    fn client(handler: impl Fn(&str, &HashMap<String, String>) -> Result<Value, ReportError> + 'static) -> MoodleClient<Scripted> {
        MoodleClient::with_transport(Scripted { handler: Box::new(handler), calls: RefCell::new(Vec::new()) })
    }

    fn calls(client: &MoodleClient<Scripted>) -> Vec<String> {
        client.transport.calls.borrow().clone()
    }

    fn api_error() -> ReportError {
        ReportError::Api { code: "invalidtoken".into(), message: "Invalid token".into() }
    }

    #[tokio::test]
    async fn user_lookup_returns_first_match() {
        let client = client(|function, params| {
            assert_eq!(function, "core_user_get_users");
            assert_eq!(params["criteria[0][key]"], "email");
            Ok(json!({"users": [{"id": 42}, {"id": 43}], "warnings": []}))
        });
        assert_eq!(client.get_user_id_by_email("t@example.org").await, Some(42));
    }

    #[tokio::test]
    async fn user_lookup_is_absent_when_nobody_matches_or_call_fails() {
        let empty = client(|_, _| Ok(json!({"users": []})));
        assert_eq!(empty.get_user_id_by_email("x@example.org").await, None);

        let failing = client(|_, _| Err(api_error()));
        assert_eq!(failing.get_user_id_by_email("x@example.org").await, None);
    }

    fn course_fixture() -> Value {
        json!([
            {"id": 1, "fullname": "Ongoing", "startdate": 1704067200, "enddate": 0},
            {"id": 2, "fullname": "Bounded", "startdate": 1709251200, "enddate": 1719792000},
            {"id": 3, "fullname": "Too early", "startdate": 1672531200, "enddate": 0},
            {"id": 4, "fullname": "Ends late", "startdate": 1709251200, "enddate": 1798761600},
            {"id": 5, "fullname": "No start"},
            {"id": 6, "fullname": "No end", "startdate": 1717200000}
        ])
    }

    #[tokio::test]
    async fn teacher_courses_are_filtered_to_the_window() {
        let client = client(|function, params| {
            assert_eq!(function, "core_enrol_get_users_courses");
            assert_eq!(params["userid"], "2");
            Ok(course_fixture())
        });
        let list = client.get_teacher_courses(2, "2024-01-01", "2026-01-01").await.unwrap();

        let ids: Vec<i64> = list.courses.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 6]);
        assert_eq!(list.count, 3);
        assert_eq!(list.courses[0].start_date, "2024-01-01");
        assert_eq!(list.courses[0].end_date, "unspecified");
        assert_eq!(list.courses[1].end_date, "2024-07-01");
        assert_eq!(list.courses[2].end_date, "unspecified");
    }

    #[test]
    fn every_listed_course_respects_the_bounds() {
        let start = parse_date("2024-01-01").unwrap();
        let end = parse_date("2026-01-01").unwrap();
        let fixture = course_fixture();
        let records = as_array(&fixture).unwrap();

        let kept = filter_courses(records, start, end);
        for course in &kept.courses {
            assert!(course.start_date.as_str() >= "2024-01-01");
            assert!(course.end_date == "unspecified" || course.end_date.as_str() <= "2026-01-01");
        }
    }

    #[tokio::test]
    async fn inverted_window_makes_no_call() {
        let client = client(|_, _| Ok(course_fixture()));
        assert!(client.get_teacher_courses(2, "2026-01-01", "2024-01-01").await.is_none());
        assert!(client.get_teacher_courses(2, "01/01/2024", "2026-01-01").await.is_none());
        assert!(calls(&client).is_empty());
    }

    #[tokio::test]
    async fn teacher_courses_absent_on_malformed_response() {
        let client = client(|_, _| Ok(json!({"courses": []})));
        assert!(client.get_teacher_courses(2, "2024-01-01", "2026-01-01").await.is_none());
    }

    fn grades_fixture() -> Value {
        json!({"usergrades": [
            {"userid": 10, "userfullname": "Anna Smith", "gradeitems": [
                {"id": 1, "itemname": "Essay", "itemtype": "mod", "grademax": 10, "gradedatesubmitted": 1735689600,
                 "gradeformatted": "8.00", "percentageformatted": "80.00 %"},
                {"id": 2, "itemname": "Oral exam", "itemtype": "manual", "grademax": 5, "gradedatesubmitted": null,
                 "gradeformatted": "4.00", "percentageformatted": "80.00 %"},
                {"id": 3, "itemname": "Late project", "itemtype": "mod", "grademax": 20, "gradedatesubmitted": 1798761600},
                {"id": 4, "itemname": null, "itemtype": "course", "grademax": 100}
            ]},
            {"userid": 11, "userfullname": "Boris Ivanov", "gradeitems": [
                {"id": 2, "itemname": "Renamed oral", "itemtype": "manual", "grademax": 7,
                 "gradeformatted": "3.00", "percentageformatted": "60.00 %"},
                {"id": 5, "itemname": "Quiz 1", "itemtype": "mod"}
            ]},
            {"userfullname": "Nobody", "gradeitems": []}
        ]})
    }

    fn period() -> Period {
        Period { start: parse_date("2023-06-29").unwrap(), end: parse_date("2026-06-29").unwrap() }
    }

    #[test]
    fn interim_report_keeps_undated_and_in_window_items() {
        let report = build_interim_report(5, &grades_fixture(), period()).unwrap();

        let names: Vec<&str> = report.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Essay", "Oral exam", "Quiz 1"]);
        assert_eq!(report.items[0].date, ItemDate::On(parse_date("2025-01-01").unwrap()));
        assert_eq!(report.items[1].date, ItemDate::Unspecified);
        assert_eq!(report.items[1].max_grade, 5.0);
        assert_eq!(report.items[2].item_type, "mod");
        assert_eq!(report.items[2].max_grade, 0.0);
        assert_eq!(report.note, INTERIM_NOTE);
        assert_eq!(report.course_id, 5);
    }

    #[test]
    fn interim_report_joins_grades_per_student() {
        let report = build_interim_report(5, &grades_fixture(), period()).unwrap();

        assert_eq!(report.students.len(), 2);
        let anna = &report.students[0];
        assert_eq!(anna.user_id, 10);
        assert_eq!(anna.grades.len(), 2);
        assert_eq!(anna.grades[0], StudentGrade { item: "Essay".into(), grade: "8.00".into(), percentage: "80.00 %".into() });

        let boris = &report.students[1];
        assert_eq!(boris.grades[0], StudentGrade { item: "Oral exam".into(), grade: "3.00".into(), percentage: "60.00 %".into() });
        assert_eq!(boris.grades[1], StudentGrade { item: "Quiz 1".into(), grade: "-".into(), percentage: "-".into() });
    }

    #[test]
    fn deduplication_is_idempotent() {
        let first = build_interim_report(5, &grades_fixture(), period()).unwrap();
        let second = build_interim_report(5, &grades_fixture(), period()).unwrap();
        assert_eq!(first.items, second.items);
    }

    #[test]
    fn undated_items_survive_any_window() {
        let narrow = Period { start: parse_date("1999-01-01").unwrap(), end: parse_date("1999-01-02").unwrap() };
        let report = build_interim_report(5, &grades_fixture(), narrow).unwrap();
        assert!(report.items.iter().all(|item| item.date == ItemDate::Unspecified));
        assert!(report.items.iter().any(|item| item.name == "Oral exam"));
    }

    #[test]
    fn items_after_the_window_end_are_excluded() {
        let fixture = json!({"usergrades": [{"userid": 1, "userfullname": "A", "gradeitems": [
            {"id": 1, "itemname": "Inside", "gradedatesubmitted": 1735689600},
            {"id": 2, "itemname": "After", "gradedatesubmitted": 1782864000}
        ]}]});
        let report = build_interim_report(5, &fixture, period()).unwrap();
        let names: Vec<&str> = report.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Inside"]);
    }

    #[test]
    fn window_edges_are_midnight_of_each_bound() {
        let start = epoch_of(period().start);
        let end = epoch_of(period().end);
        let fixture = json!({"usergrades": [{"userid": 1, "userfullname": "A", "gradeitems": [
            {"id": 1, "itemname": "AtStart", "gradedatesubmitted": start},
            {"id": 2, "itemname": "AtEndMidnight", "gradedatesubmitted": end},
            {"id": 3, "itemname": "EndNoon", "gradedatesubmitted": end + 43200},
            {"id": 4, "itemname": "BeforeStart", "gradedatesubmitted": start - 1}
        ]}]});

        let report = build_interim_report(5, &fixture, period()).unwrap();
        let names: Vec<&str> = report.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["AtStart", "AtEndMidnight"]);
        assert_eq!(report.items[0].date, ItemDate::On(period().start));
        assert_eq!(report.items[1].date, ItemDate::On(period().end));
    }

    #[test]
    fn course_window_bounds_are_inclusive() {
        let start = parse_date("2024-01-01").unwrap();
        let end = parse_date("2026-01-01").unwrap();
        let (from, to) = (epoch_of(start), epoch_of(end));
        let fixture = json!([
            {"id": 1, "fullname": "Exact", "startdate": from, "enddate": to},
            {"id": 2, "fullname": "Ends a second late", "startdate": from, "enddate": to + 1},
            {"id": 3, "fullname": "Starts a second early", "startdate": from - 1, "enddate": to}
        ]);

        let kept = filter_courses(as_array(&fixture).unwrap(), start, end);
        assert_eq!(kept.courses.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(kept.courses[0].start_date, "2024-01-01");
        assert_eq!(kept.courses[0].end_date, "2026-01-01");
    }

    #[test]
    fn interim_report_fails_without_grade_data() {
        assert!(matches!(build_interim_report(5, &json!({}), period()), Err(ReportError::Empty(_))));
        assert!(matches!(build_interim_report(5, &json!({"usergrades": []}), period()), Err(ReportError::Empty(_))));

        let all_late = json!({"usergrades": [{"userid": 1, "userfullname": "A", "gradeitems": [
            {"id": 1, "itemname": "After", "gradedatesubmitted": 1798761600}
        ]}]});
        assert!(matches!(build_interim_report(5, &all_late, period()), Err(ReportError::Empty(_))));
    }

    #[test]
    fn malformed_item_is_skipped_not_fatal() {
        let fixture = json!({"usergrades": [{"userid": 1, "userfullname": "A", "gradeitems": [
            {"id": 1, "itemname": "Broken date", "gradedatesubmitted": "soon"},
            {"itemname": "No id"},
            {"id": 3, "itemname": "Fine"}
        ]}]});
        let report = build_interim_report(5, &fixture, period()).unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].name, "Fine");
    }

    #[tokio::test]
    async fn interim_assessment_is_absent_on_api_error() {
        let client = client(|_, _| Err(api_error()));
        assert!(client.track_interim_assessment(5, "2023-06-29", "2026-06-29").await.is_none());
    }

    #[tokio::test]
    async fn quizzes_are_restricted_to_requested_ids() {
        let client = client(|function, params| {
            assert_eq!(function, "mod_quiz_get_quizzes_by_courses");
            assert_eq!(params["courseids[0]"], "5");
            Ok(json!({"quizzes": [
                {"id": 7, "name": "Intro", "grade": 10},
                {"id": 8, "name": "Midterm", "grade": "20.00"},
                {"id": 9}
            ]}))
        });
        let quizzes = client.get_quizzes(&[8, 9, 99], 5).await;
        assert_eq!(quizzes.keys().copied().collect::<Vec<_>>(), vec![8]);
        assert_eq!(quizzes[&8].max_grade, Some(20.0));
    }

    #[tokio::test]
    async fn quizzes_empty_without_ids_or_on_bad_shape() {
        let client = client(|_, _| Ok(json!([])));
        assert!(client.get_quizzes(&[], 5).await.is_empty());
        assert!(calls(&client).is_empty());
        assert!(client.get_quizzes(&[1], 5).await.is_empty());
    }

    #[tokio::test]
    async fn group_members_are_numeric_ids() {
        let client = client(|_, params| {
            assert_eq!(params["groupids[0]"], "3");
            Ok(json!([{"groupid": 3, "userids": [10, "11", "x"]}, {"groupid": 4, "userids": [99]}]))
        });
        assert_eq!(client.get_group_members(3).await, vec![10, 11]);

        let empty = client_returning(json!([]));
        assert!(empty.get_group_members(3).await.is_empty());
        let malformed = client_returning(json!({"oops": true}));
        assert!(malformed.get_group_members(3).await.is_empty());
    }

    fn client_returning(value: Value) -> MoodleClient<Scripted> {
        client(move |_, _| Ok(value.clone()))
    }

    #[tokio::test]
    async fn student_names_are_keyed_by_id() {
        let client = client(|function, params| {
            assert_eq!(function, "core_user_get_users_by_field");
            assert_eq!(params["field"], "id");
            assert_eq!(params["values[1]"], "11");
            Ok(json!([
                {"id": 10, "firstname": "Anna", "lastname": "Smith"},
                {"id": 11, "firstname": "Boris", "lastname": "Ivanov"}
            ]))
        });
        let names = client.get_student_names(&[10, 11]).await;
        assert_eq!(names[&10], "Anna Smith");
        assert_eq!(names[&11], "Boris Ivanov");
        assert!(client.get_student_names(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn only_finished_attempts_are_kept_and_failures_skipped() {
        let client = client(|_, params| match params["quizid"].as_str() {
            "1" => Ok(json!({"attempts": [
                {"quiz": 1, "state": "finished", "sumgrades": 5.0},
                {"quiz": 1, "state": "inprogress", "sumgrades": null},
                {"quiz": 1, "state": "finished", "sumgrades": null}
            ]})),
            _ => Err(api_error()),
        });
        let attempts = client.get_finished_attempts(10, &[1, 2]).await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].grade, 5.0);
        assert_eq!(attempts[1].raw_grade, None);
        assert_eq!(attempts[1].grade, 0.0);
    }

    fn results_handler(members: Value) -> impl Fn(&str, &HashMap<String, String>) -> Result<Value, ReportError> {
        move |function: &str, params: &HashMap<String, String>| match function {
            "core_group_get_group_members" => Ok(json!([{"groupid": 3, "userids": members.clone()}])),
            "mod_quiz_get_quizzes_by_courses" => Ok(json!({"quizzes": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]})),
            "core_user_get_users_by_field" => Ok(json!([
                {"id": 10, "firstname": "Carol", "lastname": "White"},
                {"id": 11, "firstname": "alice@example.org", "lastname": ""},
                {"id": 12, "firstname": "Bob", "lastname": "Brown"}
            ])),
            "mod_quiz_get_user_attempts" => {
                let attempts = match (params["userid"].as_str(), params["quizid"].as_str()) {
                    ("10", "1") => json!([{"state": "finished", "sumgrades": 5.0}]),
                    ("10", "2") => json!([{"state": "finished", "sumgrades": "8.0"}, {"state": "inprogress", "sumgrades": 9.5}]),
                    ("11", "2") => json!([{"state": "finished", "sumgrades": 3.0}]),
                    _ => json!([]),
                };
                Ok(json!({"attempts": attempts}))
            }
            other => panic!("unexpected call {}", other),
        }
    }

    #[tokio::test]
    async fn best_results_sorted_by_name() {
        let client = client(results_handler(json!([10, 11, 12])));
        let results = client.analyze_attempts_results(&[1, 2], 3, 5).await;

        let summary: Vec<(&str, f64)> = results.iter().map(|r| (r.name.as_str(), r.best_grade)).collect();
        assert_eq!(summary, vec![("Bob Brown", 0.0), ("Carol White", 8.0), ("alice", 3.0)]);
    }

    #[tokio::test]
    async fn ordering_does_not_depend_on_membership_order() {
        let forward = client(results_handler(json!([10, 11, 12])));
        let reverse = client(results_handler(json!([12, 11, 10])));
        assert_eq!(
            forward.analyze_attempts_results(&[1, 2], 3, 5).await,
            reverse.analyze_attempts_results(&[1, 2], 3, 5).await
        );
    }

    #[tokio::test]
    async fn empty_group_yields_no_results() {
        let client = client(|function, _| match function {
            "core_group_get_group_members" => Ok(json!([])),
            other => panic!("unexpected call {}", other),
        });
        assert!(client.analyze_attempts_results(&[1], 3, 5).await.is_empty());
    }

    #[test]
    fn student_without_attempts_scores_zero() {
        assert_eq!(best_grade(&[]), 0.0);
        let ranked = rank_results(vec![(7, None, 0.0)]);
        assert_eq!(ranked[0].name, "user 7");
        assert_eq!(ranked[0].best_grade, 0.0);
    }

    #[test]
    fn email_placeholders_are_cut_at_the_at_sign() {
        assert_eq!(clean_display_name("ivanov@mail.ru ivanov@mail.ru"), "ivanov");
        assert_eq!(clean_display_name("  Anna Smith "), "Anna Smith");
        assert_eq!(clean_display_name("Anna (@anna)"), "Anna (@anna)");
    }

    #[test]
    fn names_with_a_trailing_address_are_kept_whole() {
        assert_eq!(clean_display_name("Ivan ivanov@mail.ru"), "Ivan ivanov@mail.ru");
        assert_eq!(clean_display_name("john@"), "john@");
        assert_eq!(clean_display_name(" petrov@uni.edu "), "petrov");
    }

    #[tokio::test]
    async fn course_groups_skip_malformed_entries() {
        let client = client_returning(json!([
            {"id": 1, "courseid": 5, "name": "Group A"},
            {"id": 2, "courseid": 5},
            {"id": 3, "courseid": 5, "name": "Group C"}
        ]));
        let groups = client.get_course_groups(5).await.unwrap();
        assert_eq!(groups, vec![
            CourseGroup { id: 1, name: "Group A".into() },
            CourseGroup { id: 3, name: "Group C".into() },
        ]);
    }

    #[tokio::test]
    async fn group_name_resolves_or_is_absent() {
        let named = client_returning(json!([{"id": 3, "name": "Evening cohort"}]));
        assert_eq!(named.get_group_name(3).await.as_deref(), Some("Evening cohort"));
        assert_eq!(named.get_group_name(4).await, None);

        let failing = client(|_, _| Err(api_error()));
        assert_eq!(failing.get_group_name(3).await, None);
        assert_eq!(failing.get_course_groups(5).await, None);
    }
}
