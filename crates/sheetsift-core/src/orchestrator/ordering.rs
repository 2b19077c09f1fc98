use ahash::AHashSet;
use std::hash::Hasher as _;
use std::path::PathBuf;
use twox_hash::XxHash64;

/// Cheap per-archive profile built during assessment: declared size plus a
/// hash signature of the entry-name list. No content reads.
#[derive(Debug, Clone)]
pub struct ArchiveProfile {
    pub path: PathBuf,
    pub size: u64,
    pub document_count: usize,
    pub signature: AHashSet<u64>,
}

impl ArchiveProfile {
    pub fn new(path: PathBuf, size: u64, entry_names: &[String], document_count: usize) -> Self {
        let signature = entry_names
            .iter()
            .map(|name| {
                let mut hasher = XxHash64::with_seed(0);
                hasher.write(name.as_bytes());
                hasher.finish()
            })
            .collect();
        Self {
            path,
            size,
            document_count,
            signature,
        }
    }
}

/// Blend of size ratio and entry-name Jaccard overlap, both in [0, 1].
pub fn similarity(a: &ArchiveProfile, b: &ArchiveProfile) -> f64 {
    let size_ratio = if a.size == 0 && b.size == 0 {
        1.0
    } else {
        a.size.min(b.size) as f64 / a.size.max(b.size).max(1) as f64
    };

    let union = a.signature.union(&b.signature).count();
    let name_overlap = if union == 0 {
        0.0
    } else {
        a.signature.intersection(&b.signature).count() as f64 / union as f64
    };

    0.5 * size_ratio + 0.5 * name_overlap
}

/// Greedy nearest-neighbour ordering: start from the largest archive, then
/// repeatedly append the most similar unvisited one. Heuristic cache-locality
/// improvement, not an optimal tour.
pub fn order_for_cache_reuse(mut profiles: Vec<ArchiveProfile>) -> Vec<ArchiveProfile> {
    if profiles.len() <= 2 {
        return profiles;
    }

    let start = profiles
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| p.size)
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut ordered = Vec::with_capacity(profiles.len());
    ordered.push(profiles.swap_remove(start));

    while !profiles.is_empty() {
        let last = ordered.last().expect("ordered is non-empty");
        let next = profiles
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                similarity(last, a)
                    .partial_cmp(&similarity(last, b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        ordered.push(profiles.swap_remove(next));
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(path: &str, size: u64, names: &[&str]) -> ArchiveProfile {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        ArchiveProfile::new(PathBuf::from(path), size, &names, names.len())
    }

    #[test]
    fn test_identical_archives_are_most_similar() {
        let a = profile("a.zip", 100, &["x.csv", "y.csv"]);
        let b = profile("b.zip", 100, &["x.csv", "y.csv"]);
        let c = profile("c.zip", 90_000, &["other.csv"]);
        assert!(similarity(&a, &b) > similarity(&a, &c));
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_ordering_keeps_similar_adjacent() {
        let twins_a = profile("a.zip", 500, &["jan.csv", "feb.csv"]);
        let twins_b = profile("b.zip", 510, &["jan.csv", "feb.csv"]);
        let outlier = profile("big.zip", 100_000, &["huge.csv"]);

        let ordered = order_for_cache_reuse(vec![twins_a, outlier, twins_b]);
        // Largest first, then the twins end up adjacent.
        assert_eq!(ordered[0].path, PathBuf::from("big.zip"));
        let pos_a = ordered.iter().position(|p| p.path.ends_with("a.zip")).unwrap();
        let pos_b = ordered.iter().position(|p| p.path.ends_with("b.zip")).unwrap();
        assert_eq!(pos_a.abs_diff(pos_b), 1);
    }

    #[test]
    fn test_empty_and_small_inputs() {
        assert!(order_for_cache_reuse(vec![]).is_empty());
        let one = vec![profile("a.zip", 1, &["x.csv"])];
        assert_eq!(order_for_cache_reuse(one).len(), 1);
    }
}
