//! Persistent worker pool, barrier-synchronized with the driver.
//!
//! Workers are created once and live for the whole run. Each epoch the
//! driver publishes the pairing permutation and per-worker seeds, then
//! releases the start barrier; every worker executes its static slice of
//! pairs and parks on the end barrier. Shutdown is a flagged start
//! release followed by a join.

use crate::bff::{self, FULL_TAPE_SIZE, SINGLE_TAPE_SIZE};
use crate::rng::XorShift64;
use crate::soup::SoupShared;
use crate::token::Token;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

/// Hard cap on worker threads.
pub const MAX_THREADS: usize = 256;

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    start: Arc<Barrier>,
    end: Arc<Barrier>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `num_threads` workers over the shared arena. Slice assignment
    /// is static: worker `t` owns pairs `[t * chunk, (t + 1) * chunk)`
    /// with the last worker's upper bound snapped to the pair count.
    pub fn spawn(shared: Arc<SoupShared>, num_threads: usize) -> io::Result<Self> {
        assert!(
            num_threads >= 1 && num_threads <= MAX_THREADS,
            "num_threads must be in 1..={}",
            MAX_THREADS
        );

        let start = Arc::new(Barrier::new(num_threads + 1));
        let end = Arc::new(Barrier::new(num_threads + 1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let npairs = shared.num_pairs();
        let chunk = npairs / num_threads;

        let mut workers = Vec::with_capacity(num_threads);
        for t in 0..num_threads {
            let lo = t * chunk;
            let hi = if t == num_threads - 1 { npairs } else { lo + chunk };

            let shared = Arc::clone(&shared);
            let start = Arc::clone(&start);
            let end = Arc::clone(&end);
            let shutdown = Arc::clone(&shutdown);

            let handle = std::thread::Builder::new()
                .name(format!("soup-worker-{t}"))
                .spawn(move || worker_loop(&shared, t, lo, hi, &start, &end, &shutdown))?;
            workers.push(handle);
        }

        Ok(Self {
            workers,
            start,
            end,
            shutdown,
        })
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Release the start barrier and wait on the end barrier. The caller
    /// must have published the permutation and worker seeds first.
    pub fn run_epoch(&self) {
        self.start.wait();
        self.end.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.start.wait();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    shared: &SoupShared,
    t: usize,
    lo: usize,
    hi: usize,
    start: &Barrier,
    end: &Barrier,
    shutdown: &AtomicBool,
) {
    let npairs = shared.num_pairs();
    let mut combined = [Token::default(); FULL_TAPE_SIZE];

    loop {
        start.wait();
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let mut rng = XorShift64::from_state(shared.worker_seed(t));
        for i in lo..hi {
            let a = shared.perm(i);
            let b = shared.perm(i + npairs);

            shared.read_tape(a, &mut combined[..SINGLE_TAPE_SIZE]);
            shared.read_tape(b, &mut combined[SINGLE_TAPE_SIZE..]);

            // Heads are random per pair, drawn from the worker's stream
            let h0 = (rng.next_u64() & (FULL_TAPE_SIZE as u64 - 1)) as u8;
            let h1 = (rng.next_u64() & (FULL_TAPE_SIZE as u64 - 1)) as u8;

            let steps = bff::run(&mut combined, h0, h1);
            shared.set_pair_steps(i, steps);

            shared.write_tape(a, &combined[..SINGLE_TAPE_SIZE]);
            shared.write_tape(b, &combined[SINGLE_TAPE_SIZE..]);
        }

        end.wait();
    }
}

#[cfg(test)]
mod tests {
    use crate::bff::{MAX_STEPS, SINGLE_TAPE_SIZE};
    use crate::soup::{Soup, SoupParams};

    fn params(seed: u64, num_tapes: usize, num_threads: usize) -> SoupParams {
        SoupParams {
            num_tapes,
            seed,
            num_threads,
            mutation_rate: 0.0,
        }
    }

    fn arena_bits(soup: &Soup) -> Vec<u64> {
        let total = soup.shared().num_tapes() * SINGLE_TAPE_SIZE;
        (0..total).map(|i| soup.shared().cell(i).bits()).collect()
    }

    #[test]
    fn test_every_pair_records_steps() {
        let mut soup = Soup::new(params(3, 16, 2)).unwrap();
        soup.run_epoch();

        for i in 0..soup.shared().num_pairs() {
            let steps = soup.shared().pair_steps(i);
            assert!(steps >= 1 && steps <= MAX_STEPS);
        }
    }

    #[test]
    fn test_multi_threaded_runs_are_deterministic() {
        let mut a = Soup::new(params(0xBEEF, 32, 4)).unwrap();
        let mut b = Soup::new(params(0xBEEF, 32, 4)).unwrap();

        for _ in 0..3 {
            a.run_epoch();
            b.run_epoch();
            assert_eq!(arena_bits(&a), arena_bits(&b));

            let n = a.shared().num_pairs();
            let sa: Vec<u32> = (0..n).map(|i| a.shared().pair_steps(i)).collect();
            let sb: Vec<u32> = (0..n).map(|i| b.shared().pair_steps(i)).collect();
            assert_eq!(sa, sb);
        }
    }

    #[test]
    fn test_pool_drains_cleanly_without_epochs() {
        // Spawn and immediately drop: the flagged start release must not
        // deadlock
        let soup = Soup::new(params(1, 4, 3)).unwrap();
        drop(soup);
    }

    #[test]
    fn test_uneven_pair_slices_cover_all_pairs() {
        // 8 pairs over 3 workers: slices 2/2/4
        let mut soup = Soup::new(params(5, 16, 3)).unwrap();
        soup.run_epoch();
        for i in 0..8 {
            assert!(soup.shared().pair_steps(i) >= 1);
        }
    }
}
