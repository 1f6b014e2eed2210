//! Merge policy
//!
//! Segments are bucketed by level: level L holds segments with
//! `mergeFactor^L <= docCount < mergeFactor^(L+1)` (empty and tiny
//! segments land in level 0). Whenever a level accumulates
//! `mergeFactor` segments they merge into one, promoting the result a
//! level up; the caller re-runs the policy until nothing overflows. A
//! merge whose result would exceed `maxMergeDocs` is skipped.

/// Chooses which segments to merge.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Segments per level before a merge triggers
    pub merge_factor: usize,
    /// Upper bound on a merged segment's doc count
    pub max_merge_docs: u32,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy {
            merge_factor: 10,
            max_merge_docs: u32::MAX,
        }
    }
}

impl MergePolicy {
    fn level(&self, doc_count: u32) -> u32 {
        let factor = self.merge_factor.max(2) as u64;
        let mut level = 0u32;
        let mut bound = factor;
        while (doc_count as u64) >= bound {
            level += 1;
            bound = match bound.checked_mul(factor) {
                Some(b) => b,
                None => return level,
            };
        }
        level
    }

    /// Positions (in manifest order) of the next overflowing level's
    /// segments, lowest level first. `None` when no level overflows.
    pub fn find_merge(&self, doc_counts: &[u32]) -> Option<Vec<usize>> {
        if self.merge_factor < 2 {
            return None;
        }
        let levels: Vec<u32> = doc_counts.iter().map(|&d| self.level(d)).collect();
        let max_level = levels.iter().copied().max().unwrap_or(0);
        for level in 0..=max_level {
            let members: Vec<usize> = levels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == level)
                .map(|(i, _)| i)
                .collect();
            if members.len() < self.merge_factor {
                continue;
            }
            let total: u64 = members.iter().map(|&i| doc_counts[i] as u64).sum();
            if total > self.max_merge_docs as u64 {
                continue;
            }
            return Some(members);
        }
        None
    }

    /// Next group for `optimize()`: up to `mergeFactor` segments from
    /// the front, bounded by `maxMergeDocs`. `None` once nothing can
    /// shrink the segment count further.
    pub fn find_optimize_merge(&self, doc_counts: &[u32]) -> Option<Vec<usize>> {
        if doc_counts.len() < 2 {
            return None;
        }
        let width = self.merge_factor.max(2);
        let mut start = 0;
        while start + 1 < doc_counts.len() {
            let mut group = Vec::new();
            let mut total = 0u64;
            for (offset, &docs) in doc_counts[start..].iter().enumerate() {
                if group.len() == width {
                    break;
                }
                if total + docs as u64 > self.max_merge_docs as u64 && !group.is_empty() {
                    break;
                }
                if docs as u64 > self.max_merge_docs as u64 {
                    break;
                }
                group.push(start + offset);
                total += docs as u64;
            }
            if group.len() >= 2 {
                return Some(group);
            }
            start += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(merge_factor: usize) -> MergePolicy {
        MergePolicy {
            merge_factor,
            max_merge_docs: u32::MAX,
        }
    }

    #[test]
    fn test_levels() {
        let p = policy(10);
        assert_eq!(p.level(0), 0);
        assert_eq!(p.level(9), 0);
        assert_eq!(p.level(10), 1);
        assert_eq!(p.level(99), 1);
        assert_eq!(p.level(100), 2);
    }

    #[test]
    fn test_no_merge_below_factor() {
        let p = policy(10);
        assert_eq!(p.find_merge(&[1; 9]), None);
        assert_eq!(p.find_merge(&[]), None);
    }

    #[test]
    fn test_level_zero_overflow() {
        let p = policy(10);
        let merge = p.find_merge(&[1; 10]).unwrap();
        assert_eq!(merge, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_levels_counted_separately() {
        let p = policy(2);
        // one level-1 segment (2 docs) and two level-0 singletons
        let merge = p.find_merge(&[2, 1, 1]).unwrap();
        assert_eq!(merge, vec![1, 2]);
        // after that merge: two level-1 segments overflow level 1
        let merge = p.find_merge(&[2, 2]).unwrap();
        assert_eq!(merge, vec![0, 1]);
        assert_eq!(p.find_merge(&[4]), None);
    }

    #[test]
    fn test_max_merge_docs_skips_level() {
        let p = MergePolicy {
            merge_factor: 2,
            max_merge_docs: 3,
        };
        // merging the two level-1 segments would exceed the cap
        assert_eq!(p.find_merge(&[2, 2]), None);
        // level 0 can still merge under the cap
        let merge = p.find_merge(&[2, 2, 1, 1]).unwrap();
        assert_eq!(merge, vec![2, 3]);
    }

    #[test]
    fn test_optimize_groups_from_front() {
        let p = policy(3);
        assert_eq!(p.find_optimize_merge(&[5, 4, 3, 2, 1]).unwrap(), vec![0, 1, 2]);
        assert_eq!(p.find_optimize_merge(&[12, 3]).unwrap(), vec![0, 1]);
        assert_eq!(p.find_optimize_merge(&[42]), None);
        assert_eq!(p.find_optimize_merge(&[]), None);
    }

    #[test]
    fn test_optimize_respects_max_merge_docs() {
        let p = MergePolicy {
            merge_factor: 10,
            max_merge_docs: 5,
        };
        // 4+1 fits, the 9-doc segment can never participate
        assert_eq!(p.find_optimize_merge(&[9, 4, 1]).unwrap(), vec![1, 2]);
        assert_eq!(p.find_optimize_merge(&[9, 6]), None);
    }
}
