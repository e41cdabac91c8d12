//! Comment-level records joined with their parent post.

use serde::{Deserialize, Serialize};

/// Stable unique identifier of a record (the comment id).
pub type RecordId = String;

/// One comment joined with its parent post.
///
/// `text_content` is derived from the three text fields and is what the
/// scoring oracle sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: RecordId,
    pub post_id: String,
    #[serde(default)]
    pub post_title: Option<String>,
    #[serde(default)]
    pub post_body: Option<String>,
    pub comment_body: String,
    #[serde(default)]
    pub text_content: String,
}

impl Record {
    pub fn new(
        record_id: impl Into<RecordId>,
        post_id: impl Into<String>,
        post_title: Option<String>,
        post_body: Option<String>,
        comment_body: impl Into<String>,
    ) -> Self {
        let mut record = Self {
            record_id: record_id.into(),
            post_id: post_id.into(),
            post_title,
            post_body,
            comment_body: comment_body.into(),
            text_content: String::new(),
        };
        record.refresh_text_content();
        record
    }

    /// Recompute `text_content` from the source fields.
    pub fn refresh_text_content(&mut self) {
        self.text_content = compose_text_content(
            self.post_title.as_deref(),
            self.post_body.as_deref(),
            &self.comment_body,
        );
    }
}

/// Build the labeled text block scored by the oracle.
///
/// Absent post fields render as empty sections; the labels are fixed.
pub fn compose_text_content(
    post_title: Option<&str>,
    post_body: Option<&str>,
    comment_body: &str,
) -> String {
    format!(
        "Post Title:\n\n{}\n\nPost Body:\n\n{}\n\nComment Body:\n\n{}",
        post_title.unwrap_or(""),
        post_body.unwrap_or(""),
        comment_body
    )
}
