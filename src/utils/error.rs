use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("moodle returned {code}: {message}")]
    Api { code: String, message: String },

    #[error("unexpected response shape: {0}")]
    Malformed(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Empty(String),
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Malformed(e.to_string())
    }
}

#[derive(Debug)]
pub struct Skipped {
    pub label: String,
    pub error: ReportError,
}

// Outcome of decoding a list of loosely typed records: the records that
// passed validation, plus the ones dropped and why.
#[derive(Debug)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub skipped: Vec<Skipped>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Batch { items: Vec::new(), skipped: Vec::new() }
    }
}

impl<T> Batch<T> {
    pub fn push(&mut self, label: impl Into<String>, outcome: Result<T, ReportError>) {
        match outcome {
            Ok(item) => self.items.push(item),
            Err(error) => self.skipped.push(Skipped { label: label.into(), error }),
        }
    }

    // Logs every skipped record and hands back the accepted ones.
    pub fn into_logged(self, context: &str) -> Vec<T> {
        for skip in &self.skipped {
            warn!("{}: skipped {}: {}", context, skip.label, skip.error);
        }
        self.items
    }
}

impl<T> FromIterator<(String, Result<T, ReportError>)> for Batch<T> {
    fn from_iter<I: IntoIterator<Item = (String, Result<T, ReportError>)>>(iter: I) -> Self {
        let mut batch = Batch::default();
        for (label, outcome) in iter {
            batch.push(label, outcome);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_separates_accepted_and_skipped_records() {
        let batch: Batch<i64> = vec![
            ("a".to_string(), Ok(1)),
            ("b".to_string(), Err(ReportError::MissingField("id"))),
            ("c".to_string(), Ok(3)),
        ]
        .into_iter()
        .collect();

        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].label, "b");
        assert_eq!(batch.into_logged("test"), vec![1, 3]);
    }

    #[test]
    fn api_error_message_names_the_code() {
        let error = ReportError::Api { code: "invalidtoken".into(), message: "Invalid token".into() };
        assert_eq!(error.to_string(), "moodle returned invalidtoken: Invalid token");
    }
}
