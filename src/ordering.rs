//! Lexicographic comparison over a list of keys
//!
//! `lexicographic(a, b, &[k1, k2, ...])` compares by `k1`, falls through to
//! `k2` on a tie, and so on. Used wherever an ordering is defined over several
//! fields (release identifiers, merge-heap entries).

use std::cmp::Ordering;

/// A single comparison step.
pub type Comparator<T> = fn(&T, &T) -> Ordering;

/// Compare `a` and `b` key by key, returning the first non-equal result.
pub fn lexicographic<T>(a: &T, b: &T, keys: &[Comparator<T>]) -> Ordering {
    keys.iter()
        .map(|key| key(a, b))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_difference_wins() {
        let keys: [Comparator<(u8, u8)>; 2] = [|a, b| a.0.cmp(&b.0), |a, b| a.1.cmp(&b.1)];
        assert_eq!(lexicographic(&(1, 9), &(2, 0), &keys), Ordering::Less);
        assert_eq!(lexicographic(&(1, 9), &(1, 0), &keys), Ordering::Greater);
        assert_eq!(lexicographic(&(1, 1), &(1, 1), &keys), Ordering::Equal);
    }

    #[test]
    fn test_no_keys_is_equal() {
        assert_eq!(lexicographic::<u8>(&1, &2, &[]), Ordering::Equal);
    }
}
