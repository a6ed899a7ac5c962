//! Rejection rule engine.
//!
//! Operator-supplied regular expressions classify fragments in two modes
//! sharing one rule set:
//!
//! - **Inline filter**, applied to each window during extraction. The
//!   observed production polarity is preserved deliberately: a rule that
//!   does not match the full window text rejects the fragment with its
//!   id, and a rule whose match survives stripping the window down to its
//!   keyword occurrences also rejects. Only a rule that matches the full
//!   text but not the stripped text is neutral. Product owners have been
//!   flagged that the first branch inverts the intuitive
//!   "matches-benign-pattern → reject" reading; do not "fix" it here.
//! - **Coverage reconciliation**, applied to already-persisted fragments
//!   when the rule set changes: a fragment is matched only when every
//!   keyword occurrence is spanned by some rule match, and reports with
//!   no reviewable fragments left are closed as `false`.

use anyhow::Result;

use crate::models::{
    Fragment, RejectRule, ReportStatus, TextFragment, DISPOSITIVE_MANUAL_VERIFY, DISPOSITIVE_NEW,
};
use crate::store::Store;

/// The window text reduced to its keyword occurrences: everything before
/// the first occurrence, then the occurrence substrings in order.
pub fn stripped_text(text: &str, fragment: &Fragment) -> String {
    let mut stripped = String::new();
    if let Some((first_start, _)) = fragment.pairs().next() {
        stripped.push_str(&text[fragment.left..first_start]);
    }
    for (start, end) in fragment.pairs() {
        stripped.push_str(&text[start..end]);
    }
    stripped
}

/// Inline filter: the dispositive for one window, `0` when no rule
/// claims it. First claiming rule wins.
pub fn check_fragment(text: &str, fragment: &Fragment, rules: &[RejectRule]) -> i64 {
    let full = &text[fragment.left..fragment.right];

    for rule in rules {
        if !rule.rule.is_match(full) {
            return rule.id;
        }
        // The pattern is present in the window; when it also holds on the
        // occurrence-stripped text, the match is not an artifact of the
        // surrounding context and the fragment is noise.
        if rule.rule.is_match(&stripped_text(text, fragment)) {
            return rule.id;
        }
    }

    DISPOSITIVE_NEW
}

/// Coverage check for a persisted fragment: `Some(rule_id)` when every
/// keyword occurrence is spanned by at least one rule match, tagged with
/// the rule covering the first occurrence. Partial coverage leaves the
/// fragment unmatched.
pub fn coverage_match(fragment: &TextFragment, rules: &[RejectRule]) -> Option<i64> {
    let byte_offsets = char_to_byte_offsets(&fragment.text, &fragment.keyword_offsets);
    let mut first_rule = None;

    for pair in byte_offsets.chunks_exact(2) {
        let (start, end) = (pair[0], pair[1]);
        let covering = rules.iter().find(|rule| {
            rule.rule
                .find_iter(&fragment.text)
                .any(|m| m.start() <= start && end <= m.end())
        })?;
        first_rule.get_or_insert(covering.id);
    }

    first_rule
}

fn char_to_byte_offsets(text: &str, char_offsets: &[usize]) -> Vec<usize> {
    char_offsets
        .iter()
        .map(|&c| {
            text.char_indices()
                .nth(c)
                .map(|(b, _)| b)
                .unwrap_or(text.len())
        })
        .collect()
}

/// Summary of one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub fragments_matched: u64,
    pub reports_closed: u64,
}

/// Re-evaluate every unreviewed fragment of every `fragmented` report
/// against the current rule set.
pub async fn reconcile(store: &Store) -> Result<ReconcileSummary> {
    let rules = store.rules().await?;
    let mut summary = ReconcileSummary::default();

    if rules.is_empty() {
        return Ok(summary);
    }

    for report in store.reports_by_status(ReportStatus::Fragmented).await? {
        let fragments = store
            .fragments_by_report_and_dispositive(report.id, DISPOSITIVE_NEW)
            .await?;

        for fragment in &fragments {
            if let Some(rule_id) = coverage_match(fragment, &rules) {
                store
                    .update_fragment_dispositive(fragment.id, rule_id)
                    .await?;
                summary.fragments_matched += 1;
            }
        }

        let remaining = store
            .count_fragments_by_report_and_dispositive(report.id, DISPOSITIVE_NEW)
            .await?;
        let verified = store
            .count_fragments_by_report_and_dispositive(report.id, DISPOSITIVE_MANUAL_VERIFY)
            .await?;
        if remaining == 0 && verified == 0 {
            store
                .update_report_status(report.id, ReportStatus::False)
                .await?;
            summary.reports_closed += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, expr: &str) -> RejectRule {
        RejectRule {
            id,
            rule: regex::Regex::new(expr).unwrap(),
        }
    }

    fn whole_fragment(text: &str, keyword: &str) -> Fragment {
        let occ = text.find(keyword).unwrap();
        Fragment::new(0, text.len(), vec![occ, occ + keyword.len()])
    }

    #[test]
    fn test_stripped_text_prefix_plus_occurrences() {
        let text = "prefix KEY middle KEY suffix";
        let fragment = Fragment::new(0, text.len(), vec![7, 10, 18, 21]);
        assert_eq!(stripped_text(text, &fragment), "prefix KEYKEY");
    }

    #[test]
    fn test_rule_not_matching_full_text_rejects() {
        let text = "nothing suspicious here KEY";
        let fragment = whole_fragment(text, "KEY");
        let rules = vec![rule(100, "never-present")];
        assert_eq!(check_fragment(text, &fragment, &rules), 100);
    }

    #[test]
    fn test_match_in_context_only_is_neutral() {
        // "example" appears after the occurrence, so it matches the full
        // text but not the stripped text.
        let text = "KEY=abc this is an example file";
        let fragment = whole_fragment(text, "KEY");
        let rules = vec![rule(100, "example")];
        assert_eq!(check_fragment(text, &fragment, &rules), DISPOSITIVE_NEW);
    }

    #[test]
    fn test_match_surviving_strip_rejects() {
        // "sample" appears before the occurrence, so the stripped text
        // (prefix + occurrences) still matches.
        let text = "sample data KEY=abc";
        let fragment = whole_fragment(text, "KEY");
        let rules = vec![rule(100, "sample")];
        assert_eq!(check_fragment(text, &fragment, &rules), 100);
    }

    #[test]
    fn test_first_claiming_rule_wins() {
        let text = "nothing here KEY";
        let fragment = whole_fragment(text, "KEY");
        let rules = vec![rule(100, "absent-one"), rule(101, "absent-two")];
        assert_eq!(check_fragment(text, &fragment, &rules), 100);
    }

    #[test]
    fn test_determinism() {
        let text = "sample data KEY=abc";
        let fragment = whole_fragment(text, "KEY");
        let rules = vec![rule(100, "sample"), rule(101, "data")];
        let first = check_fragment(text, &fragment, &rules);
        for _ in 0..10 {
            assert_eq!(check_fragment(text, &fragment, &rules), first);
        }
    }

    fn persisted(text: &str, char_pairs: Vec<usize>) -> TextFragment {
        TextFragment {
            id: 1,
            report_id: 1,
            text: text.to_string(),
            keyword_offsets: char_pairs,
            sha_hash: String::new(),
            reject_id: DISPOSITIVE_NEW,
        }
    }

    #[test]
    fn test_coverage_all_pairs_spanned() {
        let text = "xx TOKEN yy TOKEN zz";
        let fragment = persisted(text, vec![3, 8, 12, 17]);
        // One match spans the whole text, covering both pairs.
        let rules = vec![rule(100, "xx.*zz")];
        assert_eq!(coverage_match(&fragment, &rules), Some(100));
    }

    #[test]
    fn test_coverage_partial_leaves_unmatched() {
        let text = "xx TOKEN yy TOKEN zz";
        let fragment = persisted(text, vec![3, 8, 12, 17]);
        // Matches only the first occurrence region.
        let rules = vec![rule(100, "xx TOKEN")];
        assert_eq!(coverage_match(&fragment, &rules), None);
    }

    #[test]
    fn test_coverage_different_rules_per_pair() {
        let text = "aa TOKEN bb TOKEN cc";
        let fragment = persisted(text, vec![3, 8, 12, 17]);
        let rules = vec![rule(100, "aa TOKEN"), rule(101, "TOKEN cc")];
        // Pair one covered by rule 100, pair two by rule 101; tag is the
        // first pair's rule.
        assert_eq!(coverage_match(&fragment, &rules), Some(100));
    }

    #[test]
    fn test_coverage_multibyte_offsets() {
        // Char offsets differ from byte offsets past the "é".
        let text = "é TOKEN x";
        let fragment = persisted(text, vec![2, 7]);
        let rules = vec![rule(100, "TOKEN")];
        assert_eq!(coverage_match(&fragment, &rules), Some(100));
    }
}
