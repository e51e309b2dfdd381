use anyhow::{Context, Result};
use log::{info, warn};
use rust_xlsxwriter::{Format, FormatAlign, Workbook};
use crate::models::{CourseList, InterimReport, ReportData, StudentResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    // Character count of the cell as it is shown.
    fn display_len(&self) -> usize {
        match self {
            Cell::Text(text) => text.chars().count(),
            Cell::Number(n) => n.to_string().chars().count(),
        }
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Cell::Text(text.to_string())
    }
}

impl From<String> for Cell {
    fn from(text: String) -> Self {
        Cell::Text(text)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n as f64)
    }
}

impl From<usize> for Cell {
    fn from(n: usize) -> Self {
        Cell::Number(n as f64)
    }
}

// A worksheet laid out in memory before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    fn new(name: &str) -> Self {
        Sheet { name: name.to_string(), rows: Vec::new() }
    }

    // Appends a row of cells.
    fn push<I, C>(&mut self, cells: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<Cell>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    // Appends an empty spacer row.
    fn push_blank(&mut self) {
        self.rows.push(Vec::new());
    }

    // Longest stringified cell of each column plus padding.
    pub fn column_widths(&self) -> Vec<f64> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        (0..columns)
            .map(|c| {
                let longest = self.rows
                    .iter()
                    .filter_map(|row| row.get(c))
                    .map(Cell::display_len)
                    .max()
                    .unwrap_or(0);
                (longest + 2) as f64 * 1.2
            })
            .collect()
    }
}

// Course rows followed by a total count row.
pub fn course_sheets(list: &CourseList) -> Vec<Sheet> {
    let mut sheet = Sheet::new("Teacher courses");
    sheet.push(["Course ID", "Course name", "Start date", "End date"]);
    for course in &list.courses {
        sheet.push([
            Cell::from(course.id),
            course.name.as_str().into(),
            course.start_date.as_str().into(),
            course.end_date.as_str().into(),
        ]);
    }
    sheet.push_blank();
    sheet.push([Cell::from("Total courses:"), list.count.into()]);
    vec![sheet]
}

// Header rows, a student-by-item grade table and the report note, plus a sheet listing every qualifying item.
pub fn interim_sheets(report: &InterimReport) -> Vec<Sheet> {
    let mut grades = Sheet::new("Interim assessment");
    grades.push([Cell::from("Course ID:"), report.course_id.into()]);
    grades.push(["Period:".to_string(), report.period.to_string()]);
    grades.push_blank();
    grades.push(["Student", "Assessment item", "Grade", "Percentage", "Max grade", "Submission date"]);

    for student in &report.students {
        for grade in &student.grades {
            let item = report.item_by_name(&grade.item);
            grades.push([
                Cell::from(student.full_name.as_str()),
                grade.item.as_str().into(),
                grade.grade.as_str().into(),
                grade.percentage.as_str().into(),
                item.map_or_else(|| "-".into(), |i| i.max_grade.into()),
                item.map_or_else(|| "-".into(), |i| i.date.to_string().into()),
            ]);
        }
    }
    grades.push_blank();
    grades.push(["Note:", report.note.as_str()]);

    let mut items = Sheet::new("Assessment items");
    items.push(["ID", "Name", "Type", "Max grade", "Date"]);
    for item in &report.items {
        items.push([
            Cell::from(item.id),
            item.name.as_str().into(),
            item.item_type.as_str().into(),
            item.max_grade.into(),
            item.date.to_string().into(),
        ]);
    }

    vec![grades, items]
}

// One row per student: name, group label and best grade.
pub fn results_sheet(results: &[StudentResult], group_label: &str) -> Sheet {
    let mut sheet = Sheet::new("Quiz results");
    sheet.push(["Student", "Group", "Best grade"]);
    for result in results {
        sheet.push([
            Cell::from(result.name.as_str()),
            group_label.into(),
            result.best_grade.into(),
        ]);
    }
    sheet
}

// Writes the sheets to `filename`, replacing any existing file. The first
// row of every sheet is bold and centred; columns are sized to their content.
pub fn write_workbook(sheets: &[Sheet], filename: &str) -> Result<()> {
    let header = Format::new().set_bold().set_align(FormatAlign::Center);
    let mut workbook = Workbook::new();

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name).with_context(|| format!("Invalid sheet name {:?}", sheet.name))?;

        for (r, row) in sheet.rows.iter().enumerate() {
            let r = u32::try_from(r).context("Too many rows")?;
            for (c, cell) in row.iter().enumerate() {
                let c = u16::try_from(c).context("Too many columns")?;
                match (cell, r == 0) {
                    (Cell::Text(text), true) => worksheet.write_string_with_format(r, c, text, &header)?,
                    (Cell::Text(text), false) => worksheet.write_string(r, c, text)?,
                    (Cell::Number(n), true) => worksheet.write_number_with_format(r, c, *n, &header)?,
                    (Cell::Number(n), false) => worksheet.write_number(r, c, *n)?,
                };
            }
        }

        for (c, width) in sheet.column_widths().into_iter().enumerate() {
            worksheet.set_column_width(u16::try_from(c).context("Too many columns")?, width)?;
        }
    }

    workbook.save(filename).with_context(|| format!("Failed to save {}", filename))?;
    info!("File {} saved successfully", filename);
    Ok(())
}

// Exports a course list or an interim assessment report. Absent data
// writes nothing.
pub fn export_to_excel(data: Option<ReportData>, filename: &str) -> Result<()> {
    let sheets = match data {
        Some(ReportData::Courses(list)) => course_sheets(&list),
        Some(ReportData::Interim(report)) => interim_sheets(&report),
        None => {
            warn!("No data to export to {}", filename);
            return Ok(());
        }
    };
    write_workbook(&sheets, filename)
}

// Exports quiz results for a group. An empty list writes nothing.
pub fn export_results(results: &[StudentResult], filename: &str, group_label: &str) -> Result<()> {
    if results.is_empty() {
        warn!("No results to export to {}", filename);
        return Ok(());
    }
    write_workbook(&[results_sheet(results, group_label)], filename)
}
