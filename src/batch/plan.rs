//! Batch planning: split a logical range into page requests and group the
//! requests into batches of at most `concurrency_limit`.

/// One request of a batched run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSlot {
    /// Position of this request across the whole run (0-based)
    pub index: usize,
    /// Batch this request belongs to (0-based)
    pub batch_index: usize,
    /// True only for the final request of the run
    pub is_last_request: bool,
    /// Item offset (page runs) or item position (item runs)
    pub skip: u64,
    /// Items requested (page size, or 1 for item runs)
    pub limit: u64,
}

/// Requests grouped into batches, in dispatch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    batches: Vec<Vec<RequestSlot>>,
}

impl BatchPlan {
    /// Pages over `[0, total_count)`.
    ///
    /// The last page is short when `total_count` is not a multiple of
    /// `page_size`.
    pub fn pages(total_count: u64, page_size: u64, concurrency_limit: usize) -> Self {
        debug_assert!(page_size > 0, "Precondition: page_size must be positive");
        let page_size = page_size.max(1);
        let page_count = total_count.div_ceil(page_size) as usize;

        Self::build(page_count, concurrency_limit, |i| {
            let skip = i as u64 * page_size;
            (skip, page_size.min(total_count - skip))
        })
    }

    /// One request per item, for heterogeneous work
    pub fn items(count: usize, concurrency_limit: usize) -> Self {
        Self::build(count, concurrency_limit, |i| (i as u64, 1))
    }

    fn build<F>(count: usize, concurrency_limit: usize, window: F) -> Self
    where
        F: Fn(usize) -> (u64, u64),
    {
        debug_assert!(concurrency_limit > 0, "Precondition: concurrency_limit must be positive");
        let per_batch = concurrency_limit.max(1);

        let mut batches: Vec<Vec<RequestSlot>> = Vec::with_capacity(count.div_ceil(per_batch));
        for index in 0..count {
            let batch_index = index / per_batch;
            if batches.len() == batch_index {
                batches.push(Vec::with_capacity(per_batch));
            }
            let (skip, limit) = window(index);
            batches[batch_index].push(RequestSlot {
                index,
                batch_index,
                is_last_request: index + 1 == count,
                skip,
                limit,
            });
        }

        let plan = BatchPlan { batches };
        plan.assert_invariants(count, per_batch);
        plan
    }

    fn assert_invariants(&self, count: usize, per_batch: usize) {
        debug_assert_eq!(self.request_count(), count, "Invariant violated: requests lost in planning");
        debug_assert!(
            self.batches.iter().all(|b| !b.is_empty() && b.len() <= per_batch),
            "Invariant violated: batch size outside 1..=concurrency_limit"
        );
        debug_assert!(
            self.slots().filter(|s| s.is_last_request).count() == usize::from(count > 0),
            "Invariant violated: exactly one last request expected"
        );
    }

    pub fn batches(&self) -> &[Vec<RequestSlot>] {
        &self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn request_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn slots(&self) -> impl Iterator<Item = &RequestSlot> {
        self.batches.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_250_items_two_at_a_time() {
        let plan = BatchPlan::pages(250, 100, 2);
        assert_eq!(plan.request_count(), 3);
        assert_eq!(plan.batch_count(), 2);

        let skips: Vec<Vec<u64>> = plan
            .batches()
            .iter()
            .map(|b| b.iter().map(|s| s.skip).collect())
            .collect();
        assert_eq!(skips, vec![vec![0, 100], vec![200]]);

        let last: Vec<_> = plan.slots().filter(|s| s.is_last_request).collect();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].skip, 200);
        assert_eq!(last[0].limit, 50);
    }

    #[test]
    fn test_exact_multiple_of_page_size() {
        let plan = BatchPlan::pages(200, 100, 5);
        assert_eq!(plan.request_count(), 2);
        assert_eq!(plan.batch_count(), 1);
        assert!(plan.slots().all(|s| s.limit == 100));
    }

    #[test]
    fn test_empty_range() {
        let plan = BatchPlan::pages(0, 100, 2);
        assert!(plan.is_empty());
        assert_eq!(plan.request_count(), 0);
    }

    #[test]
    fn test_item_plan() {
        let plan = BatchPlan::items(5, 2);
        assert_eq!(plan.batch_count(), 3);
        let batch_indexes: Vec<usize> = plan.slots().map(|s| s.batch_index).collect();
        assert_eq!(batch_indexes, vec![0, 0, 1, 1, 2]);
        assert!(plan.slots().all(|s| s.limit == 1));
        assert_eq!(plan.slots().last().map(|s| s.is_last_request), Some(true));
    }
}
