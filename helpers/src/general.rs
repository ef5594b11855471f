#[derive(Debug, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// argsort returns the indices that would sort an array.
pub fn argsort<T: std::cmp::PartialOrd>(x: &[T], order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    match order {
        SortOrder::Ascending => indices.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap()),
        SortOrder::Descending => indices.sort_by(|&a, &b| x[b].partial_cmp(&x[a]).unwrap()),
    }
    indices
}

/// clamp01 clamps a value into the closed unit interval.
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// sigmoid returns the logistic function 1 / (1 + e^-x).
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// normalized_entropy returns the Shannon entropy of a discrete distribution,
/// normalized by the maximum entropy ln(n) so the result is in [0, 1].
/// Probabilities that do not sum to 1 are renormalized first; an empty or
/// single-element distribution has entropy 0.
pub fn normalized_entropy(probs: &[f64]) -> f64 {
    if probs.len() < 2 {
        return 0.0;
    }
    let total: f64 = probs.iter().filter(|p| **p > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut h = 0.0;
    for &p in probs {
        if p > 0.0 {
            let q = p / total;
            h -= q * q.ln();
        }
    }
    h / (probs.len() as f64).ln()
}

/// fnv1a64 returns the 64-bit FNV-1a hash of the given bytes. Used where a
/// seed has to be derived reproducibly from a string key across runs.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// median returns the median of a sample (mean of the two middle elements for
/// even sample sizes). Returns 0.0 for an empty sample.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argsort_descending() {
        let x = [1.0, 3.0, 2.0];
        assert_eq!(argsort(&x, SortOrder::Descending), vec![1, 2, 0]);
    }

    #[test]
    fn sigmoid_symmetry() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_bounds() {
        // uniform distribution has maximal (normalized) entropy
        assert!((normalized_entropy(&[0.25; 4]) - 1.0).abs() < 1e-12);
        // degenerate distribution has zero entropy
        assert_eq!(normalized_entropy(&[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn fnv1a_is_stable() {
        // reference value for an empty input is the FNV offset basis
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a64(b"monza"), fnv1a64(b"monaco"));
    }

    #[test]
    fn median_even_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
