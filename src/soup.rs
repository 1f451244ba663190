//! The primordial soup: a fixed population of token tapes, paired and
//! co-executed every epoch by the worker pool, with Poisson-scattered
//! mutation between epochs.
//!
//! Sharing contract: the arena, the pairing permutation, the per-pair step
//! counts, and the per-worker seeds live in `SoupShared` as relaxed
//! atomics. The driver touches them only while the pool is parked between
//! the end and start barriers, and within an epoch the shuffled pairing
//! hands each tape to exactly one worker, so every cell has a single
//! writer at any time. The barriers publish all writes across the epoch
//! boundary; the relaxed accesses compile to plain loads and stores.

use crate::bff::SINGLE_TAPE_SIZE;
use crate::pool::WorkerPool;
use crate::rng::XorShift64;
use crate::token::Token;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Default population: 2^17 tapes.
pub const DEFAULT_SOUP_SIZE: usize = 1 << 17;

/// Configuration for a soup run.
#[derive(Clone, Debug)]
pub struct SoupParams {
    /// Number of tapes. Must be a power of two, at least 2, and at most
    /// `DEFAULT_SOUP_SIZE` (the mutation position draw is a 23-bit field).
    pub num_tapes: usize,
    /// Seed for the global stream.
    pub seed: u64,
    /// Worker thread count.
    pub num_threads: usize,
    /// Per-byte per-epoch mutation probability in [0, 1].
    pub mutation_rate: f64,
}

impl Default for SoupParams {
    fn default() -> Self {
        Self {
            num_tapes: DEFAULT_SOUP_SIZE,
            seed: 1,
            num_threads: 1,
            mutation_rate: 0.0,
        }
    }
}

/// Arena state shared between the driver and the worker pool.
pub struct SoupShared {
    /// All tokens, `num_tapes * SINGLE_TAPE_SIZE` cells, one tape after
    /// another.
    cells: Box<[AtomicU64]>,
    /// Pairing permutation, rebuilt by the driver before each epoch.
    perm: Box<[AtomicU32]>,
    /// Steps executed per pair, written by workers during an epoch.
    pair_steps: Box<[AtomicU32]>,
    /// Per-worker stream seeds for the coming epoch.
    worker_seeds: Box<[AtomicU64]>,
    num_tapes: usize,
}

impl SoupShared {
    pub(crate) fn new(num_tapes: usize, num_threads: usize) -> Self {
        let cells = (0..num_tapes * SINGLE_TAPE_SIZE)
            .map(|_| AtomicU64::new(0))
            .collect();
        let perm = (0..num_tapes).map(|i| AtomicU32::new(i as u32)).collect();
        let pair_steps = (0..num_tapes / 2).map(|_| AtomicU32::new(0)).collect();
        let worker_seeds = (0..num_threads).map(|_| AtomicU64::new(0)).collect();
        Self {
            cells,
            perm,
            pair_steps,
            worker_seeds,
            num_tapes,
        }
    }

    #[inline]
    pub fn num_tapes(&self) -> usize {
        self.num_tapes
    }

    #[inline]
    pub fn num_pairs(&self) -> usize {
        self.num_tapes / 2
    }

    /// Token at a flat cell index in `[0, num_tapes * SINGLE_TAPE_SIZE)`.
    #[inline]
    pub fn cell(&self, idx: usize) -> Token {
        Token::from_bits(self.cells[idx].load(Ordering::Relaxed))
    }

    /// Token at `(tape, cell)`.
    #[inline]
    pub fn token(&self, tape: usize, cell: usize) -> Token {
        self.cell(tape * SINGLE_TAPE_SIZE + cell)
    }

    #[inline]
    pub fn set_token(&self, tape: usize, cell: usize, tok: Token) {
        self.cells[tape * SINGLE_TAPE_SIZE + cell].store(tok.bits(), Ordering::Relaxed);
    }

    /// Copy one tape into a half of a combined execution tape.
    pub fn read_tape(&self, tape: usize, out: &mut [Token]) {
        debug_assert_eq!(out.len(), SINGLE_TAPE_SIZE);
        let base = tape * SINGLE_TAPE_SIZE;
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = Token::from_bits(self.cells[base + j].load(Ordering::Relaxed));
        }
    }

    /// Write a half of a combined execution tape back over a tape.
    pub fn write_tape(&self, tape: usize, src: &[Token]) {
        debug_assert_eq!(src.len(), SINGLE_TAPE_SIZE);
        let base = tape * SINGLE_TAPE_SIZE;
        for (j, tok) in src.iter().enumerate() {
            self.cells[base + j].store(tok.bits(), Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn perm(&self, i: usize) -> usize {
        self.perm[i].load(Ordering::Relaxed) as usize
    }

    #[inline]
    fn set_perm(&self, i: usize, v: u32) {
        self.perm[i].store(v, Ordering::Relaxed);
    }

    #[inline]
    fn swap_perm(&self, i: usize, j: usize) {
        let a = self.perm[i].load(Ordering::Relaxed);
        let b = self.perm[j].load(Ordering::Relaxed);
        self.perm[i].store(b, Ordering::Relaxed);
        self.perm[j].store(a, Ordering::Relaxed);
    }

    #[inline]
    pub fn pair_steps(&self, i: usize) -> u32 {
        self.pair_steps[i].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_pair_steps(&self, i: usize, steps: u32) {
        self.pair_steps[i].store(steps, Ordering::Relaxed);
    }

    /// Copy the last epoch's per-pair step counts into `out`.
    pub fn copy_pair_steps(&self, out: &mut [u32]) {
        debug_assert_eq!(out.len(), self.num_pairs());
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.pair_steps[i].load(Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn worker_seed(&self, t: usize) -> u64 {
        self.worker_seeds[t].load(Ordering::Relaxed)
    }

    #[inline]
    fn set_worker_seed(&self, t: usize, seed: u64) {
        self.worker_seeds[t].store(seed, Ordering::Relaxed);
    }
}

/// The soup driver: owns the global stream, the lineage ID counter, and
/// the worker pool.
pub struct Soup {
    shared: Arc<SoupShared>,
    pool: WorkerPool,
    params: SoupParams,
    rng: XorShift64,
    /// Monotone lineage counter. Driver-thread only: minting happens at
    /// initialisation and mutation, both while the pool is parked.
    next_id: u32,
    epoch: usize,
}

impl Soup {
    /// Allocate the arena, mint the initial population, and spawn the
    /// worker pool. The global stream is warmed by 32 draws before any
    /// byte is generated.
    pub fn new(params: SoupParams) -> io::Result<Self> {
        assert!(
            params.num_tapes >= 2 && params.num_tapes.is_power_of_two(),
            "num_tapes must be a power of two >= 2"
        );
        assert!(
            params.num_tapes <= DEFAULT_SOUP_SIZE,
            "num_tapes must not exceed {}",
            DEFAULT_SOUP_SIZE
        );

        let mut rng = XorShift64::new(params.seed);
        rng.discard(32);

        let shared = Arc::new(SoupShared::new(params.num_tapes, params.num_threads));

        // Every cell starts as a fresh token: unique id, epoch 0, uniform
        // payload byte.
        let mut next_id = 0u32;
        for i in 0..params.num_tapes {
            for j in 0..SINGLE_TAPE_SIZE {
                let ch = (rng.next_u64() & 0xFF) as u8;
                shared.set_token(i, j, Token::new(next_id, 0, ch));
                next_id = next_id.wrapping_add(1);
            }
        }

        let pool = WorkerPool::spawn(Arc::clone(&shared), params.num_threads)?;

        Ok(Self {
            shared,
            pool,
            params,
            rng,
            next_id,
            epoch: 0,
        })
    }

    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    #[inline]
    pub fn shared(&self) -> &SoupShared {
        &self.shared
    }

    /// Fisher-Yates over the pairing permutation. Pair `i` is
    /// `(perm[i], perm[i + num_pairs])`, so every tape lands in exactly
    /// one pair.
    fn shuffle_perm(&mut self) {
        let n = self.params.num_tapes;
        for i in 0..n {
            self.shared.set_perm(i, i as u32);
        }
        for i in (1..n).rev() {
            let j = (self.rng.next_u64() % (i as u64 + 1)) as usize;
            self.shared.swap_perm(i, j);
        }
    }

    /// Run one epoch: rebuild the pairing, fork the worker streams from
    /// the global one, release the pool, and wait for every pair
    /// execution to complete.
    pub fn run_epoch(&mut self) {
        self.epoch += 1;
        self.shuffle_perm();
        for t in 0..self.pool.num_workers() {
            self.shared.set_worker_seed(t, self.rng.next_u64());
        }
        self.pool.run_epoch();
    }

    /// Scatter `k ~ Poisson(num_tapes * 64 * rate)` fresh tokens across
    /// uniformly random arena cells. Runs on the driver thread while the
    /// pool is parked.
    pub fn mutate(&mut self) {
        let rate = self.params.mutation_rate;
        if rate <= 0.0 {
            return;
        }

        let total = self.params.num_tapes * SINGLE_TAPE_SIZE;
        let lambda = total as f64 * rate;
        let k = self.rng.poisson(lambda);

        // One draw per mutation: bits 41..63 give the cell position, bits
        // 0..7 the payload byte. Both dimensions are powers of two, so the
        // mask is exact.
        let mask = (total - 1) as u64;
        for _ in 0..k {
            let r = self.rng.next_u64();
            let pos = ((r >> 41) & mask) as usize;
            let ch = (r & 0xFF) as u8;
            let tok = Token::new(self.next_id, self.epoch as u16, ch);
            self.next_id = self.next_id.wrapping_add(1);
            self.shared
                .set_token(pos / SINGLE_TAPE_SIZE, pos % SINGLE_TAPE_SIZE, tok);
        }
    }
}
