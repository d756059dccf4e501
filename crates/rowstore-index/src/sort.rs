//! Hybrid quicksort over fixed-width records in one byte buffer.
//!
//! Ranges shorter than the insertion-sort limit use insertion sort. Larger
//! ranges are quicksorted with a median-of-five pivot and a three-way
//! partition that groups keys equal to the pivot. When the range still
//! carries a sorted prefix, the pivot sample reaches into it and the
//! partition scan skips the prefix part below the pivot. Large inputs split
//! into four ranges that are sorted on a bounded worker pool.

use rayon::{ThreadPool, ThreadPoolBuilder};
use rowstore_common::config::num_cpus;
use rowstore_common::ByteOrder;
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Bounded pool for parallel sorting. Without a pool, work runs inline.
pub struct SortPool {
    pool: Option<ThreadPool>,
}

impl SortPool {
    /// Builds a pool of `threads` workers. One thread, or a pool that fails
    /// to start, means sorting runs in the caller.
    pub fn new(threads: usize) -> Self {
        if threads <= 1 {
            return Self::synchronous();
        }
        let built = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rowstore-sort-{i}"))
            .build();
        match built {
            Ok(pool) => {
                debug!(threads, "sort pool started");
                Self { pool: Some(pool) }
            }
            Err(e) => {
                warn!(error = %e, "sort pool unavailable, sorting synchronously");
                Self::synchronous()
            }
        }
    }

    pub fn synchronous() -> Self {
        Self { pool: None }
    }

    /// Process-wide pool with one worker per CPU.
    pub fn global() -> Arc<SortPool> {
        static POOL: OnceLock<Arc<SortPool>> = OnceLock::new();
        Arc::clone(POOL.get_or_init(|| Arc::new(SortPool::new(num_cpus()))))
    }

    /// Pool with `threads` workers. Asking for one per CPU shares the
    /// process-wide pool.
    pub fn with_threads(threads: usize) -> Arc<SortPool> {
        if threads == num_cpus() {
            Self::global()
        } else {
            Arc::new(Self::new(threads))
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    fn join<A, B>(&self, a: A, b: B)
    where
        A: FnOnce() + Send,
        B: FnOnce() + Send,
    {
        match &self.pool {
            Some(pool) => {
                pool.join(a, b);
            }
            None => {
                a();
                b();
            }
        }
    }
}

/// Shape of the records being sorted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    pub objectsize: usize,
    pub keylen: usize,
    pub order: ByteOrder,
    pub isort_limit: usize,
}

/// Sorts the first `count` records of `data`. Records `[0, sort_bound)` must
/// already be ordered.
pub(crate) fn sort_records(
    data: &mut [u8],
    count: usize,
    sort_bound: usize,
    layout: Layout,
    parallel_threshold: usize,
    pool: &SortPool,
) {
    let data = &mut data[..count * layout.objectsize];
    let mut sorter = Sorter::new(data, layout);
    if count < layout.isort_limit.max(2) {
        sorter.isort(0, count);
        return;
    }
    let (lt, gt) = sorter.partition(0, count, sort_bound);

    let big_halves = lt >= layout.isort_limit && count - gt >= layout.isort_limit;
    if count > parallel_threshold && pool.is_parallel() && big_halves {
        let (left, right) = data.split_at_mut(lt * layout.objectsize);
        let right = &mut right[(gt - lt) * layout.objectsize..];
        pool.join(
            || sort_half(left, layout, pool),
            || sort_half(right, layout, pool),
        );
    } else {
        sorter.qsort(0, lt, 0);
        sorter.qsort(gt, count, 0);
    }
}

/// Partitions one half once more and sorts both quarters concurrently.
fn sort_half(data: &mut [u8], layout: Layout, pool: &SortPool) {
    let n = data.len() / layout.objectsize;
    if n < layout.isort_limit.max(2) {
        Sorter::new(data, layout).isort(0, n);
        return;
    }
    let (lt, gt) = Sorter::new(data, layout).partition(0, n, 0);
    let (left, right) = data.split_at_mut(lt * layout.objectsize);
    let right = &mut right[(gt - lt) * layout.objectsize..];
    pool.join(
        || {
            let n = left.len() / layout.objectsize;
            Sorter::new(left, layout).qsort(0, n, 0)
        },
        || {
            let n = right.len() / layout.objectsize;
            Sorter::new(right, layout).qsort(0, n, 0)
        },
    );
}

struct Sorter<'a> {
    data: &'a mut [u8],
    layout: Layout,
}

impl<'a> Sorter<'a> {
    fn new(data: &'a mut [u8], layout: Layout) -> Self {
        Self { data, layout }
    }

    fn key(&self, i: usize) -> &[u8] {
        let start = i * self.layout.objectsize;
        &self.data[start..start + self.layout.keylen]
    }

    fn compare(&self, i: usize, j: usize) -> Ordering {
        if i == j {
            return Ordering::Equal;
        }
        self.layout.order.compare(self.key(i), self.key(j))
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        let size = self.layout.objectsize;
        let (lo, hi) = (i.min(j), i.max(j));
        let (head, tail) = self.data.split_at_mut(hi * size);
        head[lo * size..(lo + 1) * size].swap_with_slice(&mut tail[..size]);
    }

    fn isort(&mut self, l: usize, r: usize) {
        for i in l + 1..r {
            let mut j = i;
            while j > l && self.compare(j - 1, j) == Ordering::Greater {
                self.swap(j, j - 1);
                j -= 1;
            }
        }
    }

    /// Sorts `[l, r)`. Recurses into the smaller side and loops on the
    /// larger one so stack depth stays logarithmic.
    fn qsort(&mut self, mut l: usize, mut r: usize, mut s: usize) {
        loop {
            if r - l < self.layout.isort_limit.max(2) {
                self.isort(l, r);
                return;
            }
            let (lt, gt) = self.partition(l, r, s);
            s = 0;
            if lt - l < r - gt {
                self.qsort(l, lt, 0);
                l = gt;
            } else {
                self.qsort(gt, r, 0);
                r = lt;
            }
        }
    }

    /// Three-way partition of `[l, r)` around a pivot key. Returns `(lt, gt)`
    /// with `[l, lt)` below the pivot, `[lt, gt)` equal to it and `[gt, r)`
    /// above it. `s` bounds the part of the range that is already ordered.
    fn partition(&mut self, l: usize, r: usize, s: usize) -> (usize, usize) {
        let pivot = self.pivot(l, r, s);
        let pivot_key = self.key(pivot).to_vec();
        let mut lt = l;
        if s > l && pivot < s {
            // the ordered prefix below the pivot is already in place
            lt = pivot;
            while lt > l && self.compare_key(lt - 1, &pivot_key) == Ordering::Equal {
                lt -= 1;
            }
        }
        let mut i = lt;
        let mut gt = r;
        while i < gt {
            match self.compare_key(i, &pivot_key) {
                Ordering::Less => {
                    self.swap(lt, i);
                    lt += 1;
                    i += 1;
                }
                Ordering::Greater => {
                    gt -= 1;
                    self.swap(i, gt);
                }
                Ordering::Equal => i += 1,
            }
        }
        (lt, gt)
    }

    fn compare_key(&self, i: usize, key: &[u8]) -> Ordering {
        self.layout.order.compare(self.key(i), key)
    }

    fn pivot(&self, l: usize, r: usize, s: usize) -> usize {
        if s == 0 || s < l {
            self.pic_middle5(l, (3 * l + r - 1) / 4, (l + r - 1) / 2, (l + 3 * r - 3) / 4, r - 1)
        } else if s < r {
            self.pic_middle5(l, l + (s - l) / 3, (l + r - 1) / 2, s, r - 1)
        } else {
            (l + r - 1) / 2
        }
    }

    fn pic_middle5(&self, a: usize, b: usize, c: usize, d: usize, e: usize) -> usize {
        self.pic_middle3(self.pic_middle3(a, b, c), d, e)
    }

    fn pic_middle3(&self, a: usize, b: usize, c: usize) -> usize {
        use Ordering::Greater;
        if self.compare(a, b) == Greater {
            if self.compare(c, a) == Greater {
                return a;
            }
            if self.compare(b, c) == Greater {
                return b;
            }
        } else {
            if self.compare(a, c) == Greater {
                return a;
            }
            if self.compare(c, b) == Greater {
                return b;
            }
        }
        c
    }
}
