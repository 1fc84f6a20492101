//! Greedy chunking by item count and cumulative payload size.

/// Per-call limits of a remote batch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_items: usize,
    /// Cumulative payload byte cap, if the API has one.
    pub max_bytes: Option<usize>,
}

impl ChunkLimits {
    /// Batched record writes (put/delete mix).
    pub const WRITE: ChunkLimits = ChunkLimits { max_items: 25, max_bytes: None };
    /// Batched point lookups.
    pub const GET: ChunkLimits = ChunkLimits { max_items: 100, max_bytes: None };
    /// Identity-keyed bulk deletes.
    pub const DELETE: ChunkLimits = ChunkLimits { max_items: 1000, max_bytes: None };
    /// Queue message sends. Kept below the 262144-byte API cap to leave room
    /// for request overhead.
    pub const SEND: ChunkLimits = ChunkLimits { max_items: 10, max_bytes: Some(260_000) };

    pub const fn items(max_items: usize) -> Self {
        Self { max_items, max_bytes: None }
    }
}

/// Split `items` into ordered chunks.
///
/// Packs greedily by count; a chunk is also closed early when adding the next
/// item would push its cumulative `size_of` over `max_bytes`. An item that is
/// larger than the cap on its own still gets a chunk to itself.
pub fn chunk_items<T, F>(items: Vec<T>, limits: ChunkLimits, size_of: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
{
    let max_items = limits.max_items.max(1);
    let mut chunks = Vec::with_capacity(items.len() / max_items + 1);
    let mut current: Vec<T> = Vec::with_capacity(max_items.min(items.len()));
    let mut current_bytes = 0usize;

    for item in items {
        let size = size_of(&item);
        let over_bytes = limits
            .max_bytes
            .is_some_and(|cap| !current.is_empty() && current_bytes + size > cap);

        if current.len() == max_items || over_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += size;
        current.push(item);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(chunks: &[Vec<usize>]) -> Vec<usize> {
        chunks.iter().map(Vec::len).collect()
    }

    #[test]
    fn splits_by_count() {
        let items: Vec<usize> = (0..57).collect();
        let chunks = chunk_items(items, ChunkLimits::WRITE, |_| 0);
        assert_eq!(sizes(&chunks), vec![25, 25, 7]);
        assert_eq!(chunks[1][0], 25);
        assert_eq!(chunks[2][6], 56);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let items: Vec<usize> = (0..50).collect();
        let chunks = chunk_items(items, ChunkLimits::WRITE, |_| 0);
        assert_eq!(sizes(&chunks), vec![25, 25]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunk_items(Vec::<usize>::new(), ChunkLimits::SEND, |_| 1);
        assert!(chunks.is_empty());
    }

    #[test]
    fn closes_chunk_before_byte_cap_is_exceeded() {
        let limits = ChunkLimits { max_items: 10, max_bytes: Some(100) };
        // 40 + 40 fits, the third 40 would make 120.
        let items = vec![40usize, 40, 40, 40, 40];
        let chunks = chunk_items(items, limits, |n| *n);
        assert_eq!(sizes(&chunks), vec![2, 2, 1]);
    }

    #[test]
    fn item_exactly_filling_cap_stays_in_chunk() {
        let limits = ChunkLimits { max_items: 10, max_bytes: Some(100) };
        let chunks = chunk_items(vec![60usize, 40, 1], limits, |n| *n);
        assert_eq!(sizes(&chunks), vec![2, 1]);
    }

    #[test]
    fn oversized_item_gets_its_own_chunk() {
        let limits = ChunkLimits { max_items: 10, max_bytes: Some(100) };
        let chunks = chunk_items(vec![10usize, 500, 10], limits, |n| *n);
        assert_eq!(chunks, vec![vec![10], vec![500], vec![10]]);
    }

    #[test]
    fn count_limit_applies_alongside_byte_cap() {
        let items = vec![1usize; 23];
        let chunks = chunk_items(items, ChunkLimits::SEND, |n| *n);
        assert_eq!(sizes(&chunks), vec![10, 10, 3]);
    }
}
