//! Fixed tag vocabulary for artifact descriptions.
//!
//! Tags are persisted verbatim inside the merged description text, so the
//! spelling here is load-bearing. The set is intentionally closed; clients
//! pick from it, they never define new tags.

/// Every tag a description may carry, in display order.
pub const AVAILABLE_TAGS: [&str; 19] = [
    "Back Side",
    "Before and After",
    "Bottom",
    "Clock In",
    "Clock Out",
    "Document",
    "East Side",
    "Finished",
    "Front Side",
    "Left Side",
    "New",
    "North Side",
    "Old",
    "Receipt",
    "Right Side",
    "South Side",
    "Start",
    "Top",
    "West Side",
];

/// Case-sensitive membership check against the vocabulary.
pub fn is_valid_tag(tag: &str) -> bool {
    AVAILABLE_TAGS.contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_membership() {
        assert!(is_valid_tag("Front Side"));
        assert!(is_valid_tag("Before and After"));
        assert!(!is_valid_tag("front side"));
        assert!(!is_valid_tag("Sideways"));
        assert!(!is_valid_tag(""));
    }

    #[test]
    fn test_vocabulary_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for tag in AVAILABLE_TAGS {
            assert!(seen.insert(tag), "duplicate tag: {}", tag);
        }
    }
}
