//! Core data models used throughout Leakscout.
//!
//! These types represent the search-API wire formats, the reports that move
//! through the pipeline, and the text fragments produced for triage.

use serde::{Deserialize, Serialize};

/// Repository owner as returned by the search API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoOwner {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub url: String,
}

/// Repository metadata as returned by the search API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub owner: RepoOwner,
}

/// One file match from a search results page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "sha", default)]
    pub sha_hash: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(rename = "repository", default)]
    pub repo: Repo,
    #[serde(default)]
    pub score: f32,
}

/// A search results page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

/// Raw-content fetch response body.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchItem {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

/// Lifecycle state of a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    /// Discovered by the search stage, awaiting download.
    Processing,
    /// Raw content downloaded and stored.
    Fetched,
    /// Fragments extracted, awaiting triage.
    Fragmented,
    /// Nothing left to review.
    False,
    /// At least one fragment manually verified as a true leak.
    Verified,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Processing => "processing",
            ReportStatus::Fetched => "fetched",
            ReportStatus::Fragmented => "fragmented",
            ReportStatus::False => "false",
            ReportStatus::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Option<ReportStatus> {
        match s {
            "processing" => Some(ReportStatus::Processing),
            "fetched" => Some(ReportStatus::Fetched),
            "fragmented" => Some(ReportStatus::Fragmented),
            "false" => Some(ReportStatus::False),
            "verified" => Some(ReportStatus::Verified),
            _ => None,
        }
    }
}

/// One discovered file match moving through the pipeline.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub search_item: SearchItem,
    /// The query keyword that discovered this file.
    pub query: String,
    pub status: String,
    /// Unix timestamp of discovery.
    pub discovered_at: i64,
}

/// A transient half-open byte window `[left, right)` into a file's decoded
/// text, tagged with the keyword occurrences it was built from.
///
/// Occurrence offsets are stored as consecutive start/end pairs in
/// `keyword_offsets`, relative to the original text until persisted.
/// Invariants: `left <= right`, both on character boundaries, and every
/// occurrence pair lies within `[left, right)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub left: usize,
    pub right: usize,
    pub keyword_offsets: Vec<usize>,
}

impl Fragment {
    pub fn new(left: usize, right: usize, keyword_offsets: Vec<usize>) -> Self {
        Self {
            left,
            right,
            keyword_offsets,
        }
    }

    pub fn len(&self) -> usize {
        self.right - self.left
    }

    pub fn is_empty(&self) -> bool {
        self.left == self.right
    }

    /// Occurrence (start, end) pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.keyword_offsets.chunks_exact(2).map(|p| (p[0], p[1]))
    }
}

/// Dispositive tags carried by a persisted fragment's `reject_id` column.
///
/// `0` is new/unreviewed; any other positive value outside this range is
/// the id of the rejection rule that auto-matched the fragment. Rule ids
/// are allocated above the manual range (see `migrate`).
pub const DISPOSITIVE_NEW: i64 = 0;
pub const DISPOSITIVE_MANUAL_REJECT: i64 = 1;
pub const DISPOSITIVE_MANUAL_VERIFY: i64 = 2;
pub const DISPOSITIVE_AUTO_REMOVED: i64 = 3;

/// The durable form of a [`Fragment`].
#[derive(Debug, Clone, Serialize)]
pub struct TextFragment {
    pub id: i64,
    pub report_id: i64,
    /// The window's text content.
    pub text: String,
    /// Fragment-relative keyword occurrence offsets, in characters, as
    /// consecutive start/end pairs.
    #[serde(rename = "ids")]
    pub keyword_offsets: Vec<usize>,
    #[serde(rename = "shahash")]
    pub sha_hash: String,
    pub reject_id: i64,
}

/// An operator-maintained regular expression used to auto-classify
/// fragments.
#[derive(Debug, Clone)]
pub struct RejectRule {
    pub id: i64,
    pub rule: regex::Regex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReportStatus::Processing,
            ReportStatus::Fetched,
            ReportStatus::Fragmented,
            ReportStatus::False,
            ReportStatus::Verified,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReportStatus::parse("bogus"), None);
    }

    #[test]
    fn test_search_item_decodes_api_shape() {
        let json = r#"{
            "name": "settings.py",
            "path": "app/settings.py",
            "sha": "1e519bd2685e43f3080a1903b9506b9e782fb483",
            "url": "https://api.example.com/repos/acme/app/contents/app/settings.py",
            "git_url": "https://api.example.com/repos/acme/app/git/blobs/1e519bd2",
            "html_url": "https://example.com/acme/app/blob/master/app/settings.py",
            "repository": {
                "name": "app",
                "full_name": "acme/app",
                "owner": { "login": "acme", "url": "https://api.example.com/users/acme" }
            },
            "score": 11.25
        }"#;
        let item: SearchItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.sha_hash, "1e519bd2685e43f3080a1903b9506b9e782fb483");
        assert_eq!(item.repo.owner.login, "acme");
    }

    #[test]
    fn test_fragment_pairs() {
        let f = Fragment::new(0, 40, vec![3, 11, 20, 28]);
        let pairs: Vec<_> = f.pairs().collect();
        assert_eq!(pairs, vec![(3, 11), (20, 28)]);
    }
}
