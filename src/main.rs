mod utils;
mod models;
use dotenv::dotenv;
use log::{error, info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use crate::models::ReportData;
use crate::utils::config::{MoodleConfig, ReportJob};
use crate::utils::excel::{export_results, export_to_excel};
use crate::utils::moodle::MoodleClient;

// Entry point for the async main function, powered by tokio runtime.
#[tokio::main]
async fn main() {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();

    // Initializes logging with simplelog to the terminal with mixed output and automatic color support.
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto
    ).ok();

    let job = match ReportJob::from_env() {
        Ok(job) => job,
        Err(e) => {
            error!("Invalid report configuration: {:#}", e);
            return;
        },
    };

    let client = match MoodleClient::new(&MoodleConfig::from_env()) {
        Ok(client) => client,
        Err(e) => {
            error!("Error building the Moodle client: {}", e);
            return;
        },
    };

    // Courses taught within the window, by id or by the teacher's email.
    let teacher_id = match (job.teacher_id, job.teacher_email.as_deref()) {
        (Some(id), _) => Some(id),
        (None, Some(email)) => client.get_user_id_by_email(email).await,
        (None, None) => None,
    };
    if let Some(teacher_id) = teacher_id {
        let courses = client.get_teacher_courses(teacher_id, &job.start_date, &job.end_date).await;
        if let Some(list) = &courses {
            info!("Found {} courses for teacher {}", list.count, teacher_id);
        }
        export(courses.map(ReportData::from), &job.courses_file);
    }

    if let Some(course_id) = job.course_id {
        if let Some(groups) = client.get_course_groups(course_id).await {
            for group in groups {
                info!("Course {} has group {} ({})", course_id, group.id, group.name);
            }
        }

        let interim = client.track_interim_assessment(course_id, &job.start_date, &job.end_date).await;
        export(interim.map(ReportData::from), &job.interim_file);
    }

    // Best quiz results of a group.
    match (job.group_id, job.course_id) {
        (Some(group_id), Some(course_id)) if !job.quiz_ids.is_empty() => {
            let label = client.get_group_name(group_id).await.unwrap_or_else(|| group_id.to_string());
            let results = client.analyze_attempts_results(&job.quiz_ids, group_id, course_id).await;
            info!("Analyzed {} students of group {}", results.len(), label);
            if let Err(e) = export_results(&results, &job.results_file, &label) {
                error!("Error exporting quiz results: {:#}", e);
            }
        },
        (Some(_), Some(_)) => info!("REPORT_QUIZ_IDS not set, skipping quiz results"),
        (Some(_), None) => warn!("REPORT_GROUP_ID needs REPORT_COURSE_ID for quiz results"),
        _ => {},
    }
}

fn export(data: Option<ReportData>, filename: &str) {
    if let Err(e) = export_to_excel(data, filename) {
        error!("Error exporting to {}: {:#}", filename, e);
    }
}
