use std::collections::BTreeSet;

/// Word alignment for one sentence pair: the set of aligned target positions
/// for every source position.
///
/// Built from a Moses-style record `"<srcLen>-<trgLen> ||| i-j i-j ..."`.
#[derive(Clone, Debug)]
pub struct Alignment {
    links: Vec<BTreeSet<usize>>,
}

const SEPARATOR: &str = " ||| ";

impl Alignment {
    /// Parse one alignment record. An empty pair list yields `None` (the
    /// sentence carries no supervision); a malformed record or an
    /// out-of-range source index aborts the process.
    pub fn parse(line: &str) -> Option<Alignment> {
        let (header, body) = line
            .split_once(SEPARATOR)
            .unwrap_or_else(|| panic!("invalid alignment record, missing separator: {line}"));
        if body.is_empty() {
            return None;
        }
        let source_len: usize = header
            .split('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("invalid alignment record, bad header: {line}"));

        let mut links = vec![BTreeSet::new(); source_len];
        for pair in body.split(' ') {
            let (src, trg) = pair
                .split_once('-')
                .unwrap_or_else(|| panic!("invalid alignment record, bad pair {pair:?}: {line}"));
            let src: usize = src
                .parse()
                .unwrap_or_else(|_| panic!("invalid alignment record, bad pair {pair:?}: {line}"));
            let trg: usize = trg
                .parse()
                .unwrap_or_else(|_| panic!("invalid alignment record, bad pair {pair:?}: {line}"));
            assert!(
                src < source_len,
                "alignment source index {src} out of range [0, {source_len}): {line}"
            );
            links[src].insert(trg);
        }
        Some(Alignment { links })
    }

    /// Number of source positions.
    #[inline]
    pub fn source_len(&self) -> usize {
        self.links.len()
    }

    /// Aligned target positions of source position `i`.
    #[inline]
    pub fn targets(&self, i: usize) -> &BTreeSet<usize> {
        &self.links[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_into_target_sets() {
        let a = Alignment::parse("3-4 ||| 0-0 0-1 2-3").unwrap();
        assert_eq!(a.source_len(), 3);
        assert_eq!(a.targets(0).iter().copied().collect::<Vec<_>>(), [0, 1]);
        assert!(a.targets(1).is_empty());
        assert_eq!(a.targets(2).iter().copied().collect::<Vec<_>>(), [3]);
    }

    #[test]
    fn empty_body_yields_none() {
        assert!(Alignment::parse("3-4 ||| ").is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_source_index_is_fatal() {
        Alignment::parse("2-2 ||| 2-0");
    }

    #[test]
    #[should_panic(expected = "bad pair")]
    fn malformed_pair_is_fatal() {
        Alignment::parse("2-2 ||| 0_0");
    }

    #[test]
    #[should_panic(expected = "missing separator")]
    fn missing_separator_is_fatal() {
        Alignment::parse("0-0 1-1");
    }
}
