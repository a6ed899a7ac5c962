//! Keyword context windowing.
//!
//! Locates every occurrence of a keyword in a decoded text blob and
//! produces a bounded context window around each one. Windows start from a
//! symmetric byte budget centered on the occurrence, are tightened to line
//! boundaries when enough surrounding lines exist, and are widened
//! outward when a bound would split a multi-byte character.

use anyhow::{bail, Result};

use crate::models::Fragment;

/// Byte offsets of every non-overlapping occurrence of `keyword`,
/// scanning left to right. Each match consumes the keyword before the
/// scan continues.
pub fn keyword_indices(text: &str, keyword: &str) -> Vec<usize> {
    if keyword.is_empty() {
        return Vec::new();
    }
    text.match_indices(keyword).map(|(i, _)| i).collect()
}

/// Collapse repeated blank lines and repeated tabs to single ones, to a
/// fixed point.
pub fn collapse_repeats(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = current.replace("\n\n", "\n").replace("\t\t", "\t");
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Produce one context window per occurrence of `keyword` in `text`.
///
/// `max_fragment_len` is the byte budget of a single window;
/// `desired_lines` is the total number of additional context lines wanted
/// around the occurrence (half on each side). Fails fast when the keyword
/// cannot fit its own window.
pub fn windows(
    text: &str,
    keyword: &str,
    max_fragment_len: usize,
    desired_lines: usize,
) -> Result<Vec<Fragment>> {
    // Round the keyword length up to even so the remaining budget splits
    // symmetrically.
    let mut adjusted = keyword.len();
    if adjusted % 2 > 0 {
        adjusted += 1;
    }

    if adjusted > max_fragment_len {
        bail!(
            "Keyword length {} exceeds the fragment budget {}",
            keyword.len(),
            max_fragment_len
        );
    }

    let occurrences = keyword_indices(text, keyword);
    if occurrences.is_empty() {
        return Ok(Vec::new());
    }

    let newlines: Vec<usize> = text
        .bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'\n')
        .map(|(i, _)| i)
        .collect();

    let shift = (max_fragment_len - adjusted) / 2;
    let half_lines = desired_lines / 2;
    let mut fragments = Vec::with_capacity(occurrences.len());

    for occ in occurrences {
        let mut left = occ.saturating_sub(shift);
        let mut right = (occ + shift).min(text.len());

        // Index of the newline immediately before / after the occurrence.
        let before = newlines.partition_point(|&p| p < occ);
        let left_line = before.checked_sub(1);
        let after = newlines.partition_point(|&p| p <= occ);
        let right_line = (after < newlines.len()).then_some(after);

        // Tighten each side to the newline `half_lines` away when that
        // many lines exist; otherwise the byte bound stands.
        if let Some(li) = left_line {
            if li >= half_lines {
                let line_bound = newlines[li - half_lines];
                if left < line_bound {
                    left = line_bound;
                }
            }
        }
        if let Some(ri) = right_line {
            let lr = ri + half_lines;
            if lr < newlines.len() {
                let line_bound = newlines[lr];
                if line_bound < right {
                    right = line_bound;
                }
            }
        }

        // The byte window is centered on the occurrence start; make sure
        // the occurrence itself is always covered.
        right = right.max(occ + keyword.len()).min(text.len());

        // Move bounds outward until both sit on character boundaries.
        while left > 0 && !text.is_char_boundary(left) {
            left -= 1;
        }
        while right < text.len() && !text.is_char_boundary(right) {
            right += 1;
        }

        fragments.push(Fragment::new(left, right, vec![occ, occ + keyword.len()]));
    }

    Ok(fragments)
}

/// All windows for every configured keyword over one text.
pub fn fragments_for_keywords(
    text: &str,
    keywords: &[String],
    max_fragment_len: usize,
    desired_lines: usize,
) -> Result<Vec<Fragment>> {
    let mut all = Vec::new();
    for keyword in keywords {
        all.extend(windows(text, keyword, max_fragment_len, desired_lines)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_indices_non_overlapping() {
        assert_eq!(keyword_indices("aaaa", "aa"), vec![0, 2]);
        assert_eq!(keyword_indices("xKEYyKEYz", "KEY"), vec![1, 5]);
        assert_eq!(keyword_indices("nothing here", "KEY"), Vec::<usize>::new());
    }

    #[test]
    fn test_collapse_repeats_reaches_fixed_point() {
        assert_eq!(collapse_repeats("a\n\n\n\nb"), "a\nb");
        assert_eq!(collapse_repeats("a\t\t\t\tb"), "a\tb");
        assert_eq!(collapse_repeats("plain"), "plain");
    }

    #[test]
    fn test_keyword_longer_than_budget_fails_fast() {
        let keyword = "A".repeat(50);
        let err = windows("some text", &keyword, 40, 5).unwrap_err();
        assert!(err.to_string().contains("budget"));
    }

    #[test]
    fn test_odd_keyword_length_rounds_up() {
        // len 39 rounds to 40, which exactly fills the budget.
        let keyword = "A".repeat(39);
        let text = format!("xx{}xx", keyword);
        assert!(windows(&text, &keyword, 40, 0).is_ok());
        assert!(windows(&text, &keyword, 39, 0).is_err());
    }

    #[test]
    fn test_window_bounds_property() {
        let text = "line one\nline two with PASSWORD inside\nline three\nline four";
        let frags = windows(text, "PASSWORD", 480, 5).unwrap();
        assert_eq!(frags.len(), 1);
        let f = &frags[0];
        let occ = text.find("PASSWORD").unwrap();
        assert!(f.left <= occ);
        assert!(occ <= f.right);
        assert!(f.right <= text.len());
        assert!(f.len() <= 480);
        assert_eq!(f.keyword_offsets, vec![occ, occ + "PASSWORD".len()]);
    }

    #[test]
    fn test_line_span_tightens_byte_window() {
        // 20 one-char lines around the occurrence; desired_lines = 2 keeps
        // one extra line on each side, far less than the byte budget.
        let mut text = String::new();
        for _ in 0..10 {
            text.push_str("x\n");
        }
        text.push_str("KEY\n");
        for _ in 0..10 {
            text.push_str("y\n");
        }

        let frags = windows(&text, "KEY", 480, 2).unwrap();
        assert_eq!(frags.len(), 1);
        let window = &text[frags[0].left..frags[0].right];
        // One line of context on each side of the keyword line.
        assert_eq!(window, "\nx\nKEY\ny");
    }

    #[test]
    fn test_insufficient_lines_keeps_byte_bound() {
        let text = "KEY and then a single long line of trailing content";
        let frags = windows(text, "KEY", 20, 4).unwrap();
        assert_eq!(frags.len(), 1);
        // No newlines at all: both bounds stay byte bounds.
        assert_eq!(frags[0].left, 0);
        assert!(frags[0].right <= text.len());
    }

    #[test]
    fn test_multibyte_boundary_never_split() {
        // Surround the keyword with multi-byte characters so naive byte
        // bounds land mid-sequence.
        let text = "ééééééKEYéééééé";
        for budget in [8, 10, 12, 14] {
            let frags = windows(text, "KEY", budget, 0).unwrap();
            for f in &frags {
                assert!(text.is_char_boundary(f.left));
                assert!(text.is_char_boundary(f.right));
                // Slicing must not panic.
                let _ = &text[f.left..f.right];
            }
        }
    }

    #[test]
    fn test_two_occurrences_two_windows() {
        let text = "aaa PASSWORD=123 bbb\nPASSWORD=123 ccc";
        let frags = windows(text, "PASSWORD", 480, 5).unwrap();
        assert_eq!(frags.len(), 2);
    }

    #[test]
    fn test_fragments_for_keywords_concatenates() {
        let text = "TOKEN=a\nSECRET=b\n";
        let frags = fragments_for_keywords(
            text,
            &["TOKEN".to_string(), "SECRET".to_string()],
            480,
            5,
        )
        .unwrap();
        assert_eq!(frags.len(), 2);
    }
}
