//! Raw post/comment flattening into scored records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Bodies that carry no content.
const NOISE_BODIES: &[&str] = &["", "[deleted]", "[removed]"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub post_id: String,
    #[serde(default)]
    pub post_title: Option<String>,
    #[serde(default)]
    pub post_body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub comment_id: String,
    pub post_id: String,
    #[serde(default)]
    pub comment_body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareStats {
    pub comments_in: usize,
    pub orphaned: usize,
    pub noise_comments: usize,
    pub noise_posts: usize,
    pub duplicates: usize,
    pub records_out: usize,
}

fn is_noise(text: Option<&str>) -> bool {
    NOISE_BODIES.contains(&text.unwrap_or("").trim())
}

/// Inner-join comments onto posts and drop rows without usable text.
///
/// A comment is dropped when its own body is noise, or when both the post
/// title and post body are noise. Duplicate comment ids keep the first row.
pub fn prepare_records(posts: &[RawPost], comments: &[RawComment]) -> (Vec<Record>, PrepareStats) {
    let mut stats = PrepareStats {
        comments_in: comments.len(),
        ..Default::default()
    };

    let by_post: HashMap<&str, &RawPost> = posts.iter().map(|p| (p.post_id.as_str(), p)).collect();
    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::new();

    for comment in comments {
        let Some(post) = by_post.get(comment.post_id.as_str()) else {
            stats.orphaned += 1;
            continue;
        };
        if is_noise(comment.comment_body.as_deref()) {
            stats.noise_comments += 1;
            continue;
        }
        if is_noise(post.post_title.as_deref()) && is_noise(post.post_body.as_deref()) {
            stats.noise_posts += 1;
            continue;
        }
        if !seen.insert(comment.comment_id.as_str()) {
            stats.duplicates += 1;
            continue;
        }

        records.push(Record::new(
            comment.comment_id.clone(),
            post.post_id.clone(),
            post.post_title.clone(),
            post.post_body.clone(),
            comment.comment_body.clone().unwrap_or_default(),
        ));
    }

    stats.records_out = records.len();
    (records, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, title: Option<&str>, body: Option<&str>) -> RawPost {
        RawPost {
            post_id: id.into(),
            post_title: title.map(Into::into),
            post_body: body.map(Into::into),
        }
    }

    fn comment(id: &str, post_id: &str, body: Option<&str>) -> RawComment {
        RawComment {
            comment_id: id.into(),
            post_id: post_id.into(),
            comment_body: body.map(Into::into),
        }
    }

    #[test]
    fn drops_orphans_noise_and_duplicates() {
        let posts = vec![
            post("p1", Some("Ceasefire talks"), None),
            post("p2", Some("[deleted]"), Some("")),
        ];
        let comments = vec![
            comment("c1", "p1", Some("a real opinion")),
            comment("c2", "p1", Some("[removed]")),
            comment("c3", "p2", Some("text under a dead post")),
            comment("c4", "p9", Some("orphan")),
            comment("c1", "p1", Some("duplicate id")),
            comment("c5", "p1", None),
        ];

        let (records, stats) = prepare_records(&posts, &comments);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "c1");
        assert_eq!(records[0].comment_body, "a real opinion");
        assert!(records[0].text_content.starts_with("Post Title:\n\nCeasefire talks"));
        assert_eq!(stats.orphaned, 1);
        assert_eq!(stats.noise_comments, 2);
        assert_eq!(stats.noise_posts, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.records_out, 1);
    }
}
