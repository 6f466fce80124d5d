use std::collections::BTreeSet;

use crate::alignment::Alignment;

/// Target-order constraint derived from a word alignment.
///
/// Every source position carries a tier: an index into the total order of
/// target spans, or -1 if the position is unaligned and therefore
/// unconstrained. Positions sharing a tier have order-equivalent aligned
/// target sets. Only constraints that pass the BTG-parsability check are ever
/// constructed, so holding a `Constraint` implies a gold binary bracketing
/// exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    tiers: Vec<i32>,
    tier_count: usize,
}

/// Dominance test between two aligned target sets: `lhs <= rhs` iff every
/// target index unique to `lhs` precedes (or equals) every index unique to
/// `rhs`, tolerating shared indices.
fn less_or_equal(lhs: &BTreeSet<usize>, rhs: &BTreeSet<usize>) -> bool {
    for &x in lhs {
        if !rhs.contains(&x) && rhs.iter().any(|&y| x > y) {
            return false;
        }
    }
    for &y in rhs {
        if !lhs.contains(&y) && lhs.iter().any(|&x| x > y) {
            return false;
        }
    }
    true
}

impl Constraint {
    /// Derive the ordered tier assignment from an alignment and validate it.
    ///
    /// Returns `None` when some pair of aligned positions is incomparable
    /// under the dominance test (a crossing alignment no total tier order can
    /// express) or when the tier sequence is not realizable as a binary
    /// bracketing.
    pub fn derive(alignment: &Alignment) -> Option<Constraint> {
        // Sorted tiers of source positions; each tier keeps the positions
        // whose target sets compare equal to its first member.
        let mut sorted_tiers: Vec<Vec<usize>> = Vec::new();
        for i in 0..alignment.source_len() {
            if alignment.targets(i).is_empty() {
                continue;
            }
            let mut equal = false;
            let mut slot = sorted_tiers.len();
            for (j, tier) in sorted_tiers.iter().enumerate() {
                let rep = alignment.targets(tier[0]);
                let le = less_or_equal(alignment.targets(i), rep);
                let ge = less_or_equal(rep, alignment.targets(i));
                if !le && !ge {
                    return None;
                }
                equal = le && ge;
                if le {
                    slot = j;
                    break;
                }
            }
            if !equal {
                sorted_tiers.insert(slot, Vec::new());
            }
            sorted_tiers[slot].push(i);
        }

        let mut tiers = vec![-1i32; alignment.source_len()];
        for (t, tier) in sorted_tiers.iter().enumerate() {
            for &i in tier {
                tiers[i] = t as i32;
            }
        }
        let constraint = Constraint {
            tiers,
            tier_count: sorted_tiers.len(),
        };
        if constraint.is_btg_parsable() {
            Some(constraint)
        } else {
            None
        }
    }

    /// Number of source positions covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tier of source position `i`, or -1 if unconstrained.
    #[inline]
    pub fn tier(&self, i: usize) -> i32 {
        self.tiers[i]
    }

    /// Number of distinct tiers.
    #[inline]
    pub fn tier_count(&self) -> usize {
        self.tier_count
    }

    /// Whether the tier sequence can be produced by a binary bracketing in
    /// which every node either keeps or swaps the order of its two children.
    ///
    /// A span is parsable iff it has width <= 1 or some split point leaves
    /// `max(left) <= min(right)` (straight) or `max(right) <= min(left)`
    /// (inverted) and both children are recursively parsable. Runs
    /// iteratively with a work stack; the first admissible split wins. Every
    /// accepted split strictly shrinks both children, so the loop terminates.
    pub fn is_btg_parsable(&self) -> bool {
        let positions: Vec<i32> = self.tiers.iter().copied().filter(|&t| t >= 0).collect();
        let n = positions.len();
        let mut lmin = vec![0i32; n];
        let mut lmax = vec![0i32; n];
        let mut rmin = vec![0i32; n];
        let mut rmax = vec![0i32; n];

        let mut stack: Vec<(usize, usize)> = vec![(0, n)];
        while let Some((lo, hi)) = stack.pop() {
            let width = hi - lo;
            if width <= 1 {
                continue;
            }
            for i in 0..width {
                let p = positions[lo + i];
                if i == 0 {
                    lmin[i] = p;
                    lmax[i] = p;
                } else {
                    lmin[i] = lmin[i - 1].min(p);
                    lmax[i] = lmax[i - 1].max(p);
                }
            }
            for i in (0..width).rev() {
                let p = positions[lo + i];
                if i == width - 1 {
                    rmin[i] = p;
                    rmax[i] = p;
                } else {
                    rmin[i] = rmin[i + 1].min(p);
                    rmax[i] = rmax[i + 1].max(p);
                }
            }
            let split = (1..width)
                .find(|&i| lmax[i - 1] <= rmin[i] || rmax[i] <= lmin[i - 1]);
            let Some(split) = split else {
                return false;
            };
            let mid = lo + split;
            if mid - lo > 1 {
                stack.push((lo, mid));
            }
            if hi - mid > 1 {
                stack.push((mid, hi));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(line: &str) -> Option<Constraint> {
        Constraint::derive(&Alignment::parse(line).unwrap())
    }

    fn from_tiers(tiers: &[i32]) -> Constraint {
        let tier_count = tiers.iter().copied().max().unwrap_or(-1) + 1;
        Constraint {
            tiers: tiers.to_vec(),
            tier_count: tier_count as usize,
        }
    }

    #[test]
    fn monotonic_alignment_yields_identity_tiers() {
        let c = derive("3-3 ||| 0-0 1-1 2-2").unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!((c.tier(0), c.tier(1), c.tier(2)), (0, 1, 2));
        assert_eq!(c.tier_count(), 3);
    }

    #[test]
    fn reversed_alignment_yields_reversed_tiers() {
        let c = derive("3-3 ||| 0-2 1-1 2-0").unwrap();
        assert_eq!((c.tier(0), c.tier(1), c.tier(2)), (2, 1, 0));
    }

    #[test]
    fn positions_with_equal_target_sets_share_a_tier() {
        let c = derive("3-2 ||| 0-0 1-0 2-1").unwrap();
        assert_eq!((c.tier(0), c.tier(1), c.tier(2)), (0, 0, 1));
        assert_eq!(c.tier_count(), 2);
    }

    #[test]
    fn unaligned_positions_are_unconstrained() {
        let c = derive("3-2 ||| 0-0 2-1").unwrap();
        assert_eq!((c.tier(0), c.tier(1), c.tier(2)), (0, -1, 1));
    }

    #[test]
    fn interval_comparable_sets_are_accepted() {
        // Shared target indices are tolerated by the dominance test.
        assert!(derive("2-3 ||| 0-0 0-1 1-1 1-2").is_some());
    }

    #[test]
    fn crossing_incomparable_pair_is_rejected() {
        // Source 0 -> {0, 2}, source 1 -> {1}: neither set dominates.
        assert!(derive("2-3 ||| 0-0 0-2 1-1").is_none());
    }

    #[test]
    fn parsable_accepts_sorted_and_reversed() {
        assert!(from_tiers(&[0, 1, 2, 3]).is_btg_parsable());
        assert!(from_tiers(&[3, 2, 1, 0]).is_btg_parsable());
        assert!(from_tiers(&[1, 0, 3, 2]).is_btg_parsable());
    }

    #[test]
    fn parsable_rejects_three_way_interleaving() {
        assert!(!from_tiers(&[2, 0, 3, 1]).is_btg_parsable());
        assert!(!from_tiers(&[1, 3, 0, 2]).is_btg_parsable());
    }

    #[test]
    fn unconstrained_positions_do_not_block_parsing() {
        assert!(from_tiers(&[2, -1, 0, 1]).is_btg_parsable());
    }

    #[test]
    fn non_parsable_alignment_is_dropped_by_derive() {
        // Tiers come out as [2, 0, 3, 1] over four positions.
        assert!(derive("4-4 ||| 0-2 1-0 2-3 3-1").is_none());
    }
}
