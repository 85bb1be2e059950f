//! Path tokenizer shared by route registration and request matching.

use smallvec::SmallVec;

/// Path segments; eight covers every route in the table without spilling.
pub type Segments<'a> = SmallVec<[&'a str; 8]>;

/// Split a URL path into its non-empty segments.
///
/// Leading, trailing and repeated slashes collapse, so `/` and `` both yield
/// no segments. Any query string must already be stripped.
pub fn split_path(path: &str) -> Segments<'_> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_empty() {
        assert!(split_path("/").is_empty());
        assert!(split_path("").is_empty());
        assert!(split_path("///").is_empty());
    }

    #[test]
    fn test_collapses_duplicate_and_trailing_slashes() {
        assert_eq!(
            split_path("//v1///jobs/abc/"),
            SmallVec::<[&str; 8]>::from_slice(&["v1", "jobs", "abc"])
        );
    }

    #[test]
    fn test_order_is_preserved() {
        let segs = split_path("/v1/agents/pki/csrs/csr-1/approve");
        assert_eq!(segs.as_slice(), ["v1", "agents", "pki", "csrs", "csr-1", "approve"]);
    }
}
