use std::collections::{HashMap, HashSet, VecDeque};

/// LRU-K replacement over frame indices. The pool owns the frames; the
/// replacer only ever sees indices.
pub struct LruKReplacer {
    k: usize,
    clock: u64,
    // Last k access times per frame, most recent at the back.
    history: HashMap<usize, VecDeque<u64>>,
    evictable: HashSet<usize>,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            clock: 0,
            history: HashMap::new(),
            evictable: HashSet::new(),
        }
    }

    pub fn record_access(&mut self, frame: usize) {
        self.clock += 1;
        let hist = self.history.entry(frame).or_default();
        hist.push_back(self.clock);
        if hist.len() > self.k {
            hist.pop_front();
        }
    }

    pub fn set_evictable(&mut self, frame: usize, evictable: bool) {
        if evictable {
            self.evictable.insert(frame);
        } else {
            self.evictable.remove(&frame);
        }
    }

    /// Picks the evictable frame with the largest backward k-distance: frames
    /// with fewer than k recorded accesses first (earliest first access wins),
    /// then the frame with the earliest k-th most recent access.
    pub fn evict(&mut self) -> Option<usize> {
        let mut victim: Option<(bool, u64, usize)> = None;
        for &frame in &self.evictable {
            let hist = self.history.get(&frame);
            let (inf, key) = match hist {
                Some(h) if h.len() >= self.k => (false, *h.front().unwrap_or(&0)),
                Some(h) => (true, *h.front().unwrap_or(&0)),
                None => (true, 0),
            };
            let better = match victim {
                None => true,
                Some((v_inf, v_key, _)) => match (inf, v_inf) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => key < v_key,
                },
            };
            if better {
                victim = Some((inf, key, frame));
            }
        }
        let (_, _, frame) = victim?;
        self.evictable.remove(&frame);
        self.history.remove(&frame);
        Some(frame)
    }

    /// Forgets a frame entirely (its page is being replaced).
    pub fn remove(&mut self, frame: usize) {
        self.evictable.remove(&frame);
        self.history.remove(&frame);
    }
}
