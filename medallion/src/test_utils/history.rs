use crate::types::DimensionVersion;

/// Asserts the SCD2 invariants over one business key's version list.
///
/// The list must be ordered by version id starting at 1, intervals must be
/// contiguous half-open ranges with no gaps or overlaps, and at most the last
/// version may be open.
pub fn assert_valid_history(versions: &[DimensionVersion]) {
    for (index, version) in versions.iter().enumerate() {
        assert_eq!(
            version.version_id,
            index as u64 + 1,
            "version ids must be dense and start at 1"
        );

        if let Some(valid_to) = version.valid_to {
            assert!(
                version.valid_from <= valid_to,
                "version {} has an inverted interval",
                version.version_id
            );
        } else {
            assert_eq!(
                index,
                versions.len() - 1,
                "only the last version may be open"
            );
        }

        if let Some(next) = versions.get(index + 1) {
            assert_eq!(
                version.valid_to,
                Some(next.valid_from),
                "interval between versions {} and {} is not contiguous",
                version.version_id,
                next.version_id
            );
        }
    }
}

/// Asserts that the history consists of exactly one open version.
pub fn assert_single_open_version(versions: &[DimensionVersion]) {
    assert_valid_history(versions);
    assert_eq!(versions.len(), 1);
    assert!(versions[0].is_current());
}
