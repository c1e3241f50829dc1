//! Fixed-size bucket tables.
use super::info::Id;
use super::BUCKET_SIZE;

/// A grid of buckets, each with [`BUCKET_SIZE`] slots that are either empty or
/// hold a record identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    buckets: Vec<[Option<Id>; BUCKET_SIZE]>,
}

impl Table {
    /// Create an empty table with the given number of buckets.
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: vec![[None; BUCKET_SIZE]; buckets],
        }
    }

    /// Number of buckets.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Get the occupant of a slot.
    pub fn get(&self, bucket: usize, pos: usize) -> Option<Id> {
        self.buckets[bucket][pos]
    }

    /// Fill a slot. Returns the previous occupant.
    pub fn set(&mut self, bucket: usize, pos: usize, id: Id) -> Option<Id> {
        self.buckets[bucket][pos].replace(id)
    }

    /// Empty a slot. Returns the previous occupant.
    pub fn take(&mut self, bucket: usize, pos: usize) -> Option<Id> {
        self.buckets[bucket][pos].take()
    }

    /// Find the first occupied slot of a bucket, probing forward from the given
    /// position and wrapping around.
    pub fn probe(&self, bucket: usize, start: usize) -> Option<(usize, Id)> {
        (0..BUCKET_SIZE)
            .map(|i| (start + i) % BUCKET_SIZE)
            .find_map(|pos| self.buckets[bucket][pos].map(|id| (pos, id)))
    }

    /// Iterate over the occupants of a bucket, in slot order.
    pub fn bucket(&self, bucket: usize) -> impl Iterator<Item = Id> + '_ {
        self.buckets[bucket].iter().flatten().copied()
    }

    /// Iterate over all occupied slots, as `(bucket, position, id)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Id)> + '_ {
        self.buckets.iter().enumerate().flat_map(|(b, slots)| {
            slots
                .iter()
                .enumerate()
                .filter_map(move |(p, slot)| slot.map(|id| (b, p, id)))
        })
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            *bucket = [None; BUCKET_SIZE];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe() {
        let mut table = Table::new(4);

        assert_eq!(table.probe(1, 10), None);

        table.set(1, 5, 42);
        assert_eq!(table.probe(1, 10), Some((5, 42)), "probing wraps around");
        assert_eq!(table.probe(1, 5), Some((5, 42)));
        assert_eq!(table.probe(2, 5), None);

        table.set(1, 20, 7);
        assert_eq!(table.probe(1, 10), Some((20, 7)));
        assert_eq!(table.bucket(1).collect::<Vec<_>>(), vec![42, 7]);
        assert_eq!(table.iter().count(), 2);

        assert_eq!(table.take(1, 20), Some(7));
        assert_eq!(table.take(1, 20), None);

        table.clear();
        assert_eq!(table.iter().count(), 0);
        assert_eq!(table.buckets(), 4);
    }
}
