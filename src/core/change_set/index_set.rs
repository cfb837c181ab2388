use std::collections::BTreeSet;

/// Sorted, de-duplicated set of collection positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet(BTreeSet<usize>);

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        index: usize,
    ) -> bool {
        self.0.insert(index)
    }

    pub fn remove(
        &mut self,
        index: usize,
    ) -> bool {
        self.0.remove(&index)
    }

    pub fn contains(
        &self,
        index: usize,
    ) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn max(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// Number of entries strictly below `index`
    pub fn count_below(
        &self,
        index: usize,
    ) -> usize {
        self.0.range(..index).count()
    }

    /// Contiguous runs as `(start, length)` pairs, ascending
    pub fn ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for index in self.iter() {
            match ranges.last_mut() {
                Some((start, len)) if *start + *len == index => *len += 1,
                _ => ranges.push((index, 1)),
            }
        }
        ranges
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        IndexSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[usize; N]> for IndexSet {
    fn from(indices: [usize; N]) -> Self {
        indices.into_iter().collect()
    }
}
