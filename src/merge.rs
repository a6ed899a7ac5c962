//! Fragment merge engine.
//!
//! Coalesces context windows whose union span fits a configured budget,
//! shrinking the number of fragments a human has to review. The default
//! engine is the greedy nearest-neighbor pass described below; a sorted
//! sweep is offered as a separate alternative because its grouping can
//! differ from the greedy one.
//!
//! Greedy pass: take the next pending fragment, find the pending candidate
//! with the smallest covering span, and absorb the pair into a joined
//! fragment when that span is within budget; otherwise the fragment is
//! final. The pass is O(n²) and not a globally optimal interval
//! clustering.

use anyhow::{bail, Result};
use std::collections::VecDeque;

use crate::models::Fragment;

/// Length of the smallest span covering both fragments.
fn union_len(a: &Fragment, b: &Fragment) -> usize {
    a.right.max(b.right) - a.left.min(b.left)
}

/// The envelope of two fragments, occurrence lists concatenated.
fn join(a: Fragment, b: Fragment) -> Fragment {
    let mut keyword_offsets = a.keyword_offsets;
    keyword_offsets.extend(b.keyword_offsets);
    Fragment::new(a.left.min(b.left), a.right.max(b.right), keyword_offsets)
}

/// Greedy nearest-neighbor coalescing.
///
/// Output order is not guaranteed to match input order. Fails when a
/// fragment wider than `max_union_len` is encountered: an individual
/// window should never exceed the union budget, so that indicates a
/// windowing misconfiguration.
pub fn merge(fragments: Vec<Fragment>, max_union_len: usize) -> Result<Vec<Fragment>> {
    let mut pending: VecDeque<Fragment> = fragments.into();
    let mut merged = Vec::with_capacity(pending.len());

    while let Some(fragment) = pending.pop_front() {
        let nearest = pending
            .iter()
            .enumerate()
            .min_by_key(|(_, candidate)| union_len(&fragment, candidate))
            .map(|(i, candidate)| (i, union_len(&fragment, candidate)));

        match nearest {
            Some((i, len)) if len <= max_union_len => {
                // Absorb: the joined fragment takes the candidate's slot
                // and stays pending for further rounds.
                let candidate = pending[i].clone();
                pending[i] = join(fragment, candidate);
            }
            _ => {
                if fragment.len() > max_union_len {
                    bail!(
                        "Fragment of length {} exceeds the union budget {}",
                        fragment.len(),
                        max_union_len
                    );
                }
                merged.push(fragment);
            }
        }
    }

    Ok(merged)
}

/// Sorted sweep-line union: O(n log n) alternative to [`merge`].
///
/// Coalesces runs of left-sorted fragments while the running envelope
/// stays within budget. Covers the same text as the greedy pass but may
/// group fragments differently; callers relying on the observed greedy
/// grouping should stay on [`merge`].
pub fn merge_sweep(mut fragments: Vec<Fragment>, max_union_len: usize) -> Result<Vec<Fragment>> {
    fragments.sort_by_key(|f| (f.left, f.right));

    let mut merged: Vec<Fragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if fragment.len() > max_union_len {
            bail!(
                "Fragment of length {} exceeds the union budget {}",
                fragment.len(),
                max_union_len
            );
        }

        match merged.last_mut() {
            Some(last) if union_len(last, &fragment) <= max_union_len => {
                let previous = last.clone();
                *last = join(previous, fragment);
            }
            _ => merged.push(fragment),
        }
    }

    Ok(merged)
}
