/// Median over a FIFO window of the most recent samples.
///
/// Backed by a sorted array of twice the window capacity. The occupied
/// region `[from, to)` floats inside the buffer: an insert binary-searches
/// the half indicated by the midpoint element and shifts that side by one
/// slot. Once the window is full, each insert evicts one element from the
/// opposite side, and when a side runs out of slack the occupied region is
/// recentered. Search is O(log n), the shift is O(n) worst case.
#[derive(Debug, Clone)]
pub struct SlidingMedian {
    buf: Vec<u64>,
    from: usize,
    to: usize,
    window: usize,
}

impl SlidingMedian {
    pub const DEFAULT_WINDOW: usize = 64;

    pub fn new(window: usize) -> Self {
        assert!(window >= 2, "window of {window} is too small to track a median");
        let cap = window * 2;
        Self { buf: vec![0; cap], from: cap / 2, to: cap / 2, window }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Middle element of the current window, 0 when empty.
    #[inline]
    pub fn estimate(&self) -> u64 {
        if self.is_empty() { 0 } else { self.buf[(self.from + self.to) / 2] }
    }

    pub fn insert(&mut self, v: u64) {
        if self.is_empty() {
            let mid = self.buf.len() / 2;
            self.buf[mid] = v;
            self.from = mid;
            self.to = mid + 1;
            return;
        }

        let mid = (self.from + self.to) / 2;
        if v < self.buf[mid] {
            if self.from == 0 {
                self.recenter();
            }
            let mid = (self.from + self.to) / 2;
            let pos = self.search(self.from, mid, v);
            self.buf.copy_within(self.from..pos, self.from - 1);
            self.buf[pos - 1] = v;
            self.from -= 1;
            if self.len() > self.window {
                // window full: evict the largest
                self.to -= 1;
            }
        } else {
            if self.to == self.buf.len() {
                self.recenter();
            }
            let mid = (self.from + self.to) / 2;
            let pos = self.search(mid, self.to, v);
            self.buf.copy_within(pos..self.to, pos + 1);
            self.buf[pos] = v;
            self.to += 1;
            if self.len() > self.window {
                // window full: evict the smallest
                self.from += 1;
            }
        }
    }

    /// First index in `[lo, hi)` whose element is >= `v`.
    #[inline]
    fn search(&self, lo: usize, hi: usize, v: u64) -> usize {
        lo + self.buf[lo..hi].partition_point(|&e| e < v)
    }

    fn recenter(&mut self) {
        let len = self.len();
        let new_from = (self.buf.len() - len) / 2;
        self.buf.copy_within(self.from..self.to, new_from);
        self.from = new_from;
        self.to = new_from + len;
    }
}

impl Default for SlidingMedian {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}
