//! Lineage statistics over the quiescent arena.
//!
//! Runs on the driver thread between epochs. rayon parallelises the
//! per-tape scans and the sort of the multi-million-entry ID buffer;
//! every reduction is an integer fold, so the results do not depend on
//! how the work is split.

use crate::bff::{self, SINGLE_TAPE_SIZE};
use crate::soup::SoupShared;
use crate::token::Token;
use rayon::prelude::*;

/// One row of the stats stream.
#[derive(Clone, Debug)]
pub struct SoupStats {
    pub epoch: usize,
    /// Mean BFF instruction count per tape.
    pub mean_ops: f64,
    /// Median instruction count (lower/upper midpoint for even counts).
    pub median_ops: f64,
    /// Mean steps per pair execution over the last epoch.
    pub mean_steps: f64,
    /// Longest pair execution of the last epoch.
    pub max_steps: u32,
    /// Distinct token IDs alive in the arena.
    pub unique_ids: u32,
    /// Most frequent token ID (the dominant lineage).
    pub modal_id: u32,
    /// How many cells the modal lineage occupies.
    pub modal_count: u32,
    /// The tape carrying the most modal-lineage cells, rendered
    /// instruction-or-space.
    pub representative: String,
}

impl SoupStats {
    /// Column header for the tab-separated stats stream.
    pub fn header() -> String {
        format!(
            "{:<10}\t{:<12}\t{:<12}\t{:<12}\t{:<12}\t{:<12}\t{:<10}\t{}",
            "epoch",
            "mean_ops",
            "median_ops",
            "mean_steps",
            "max_steps",
            "unique_ids",
            "modal_id",
            "representative_tape (modal_count)"
        )
    }

    /// Format as a tab-separated row.
    pub fn to_row(&self) -> String {
        format!(
            "{:<10}\t{:<12.4}\t{:<12.1}\t{:<12.1}\t{:<12}\t{:<12}\t{:<10}\t|{}| ({})",
            self.epoch,
            self.mean_ops,
            self.median_ops,
            self.mean_steps,
            self.max_steps,
            self.unique_ids,
            self.modal_id,
            self.representative,
            self.modal_count
        )
    }
}

/// Mean and max of the last epoch's per-pair step counts.
pub fn step_summary(shared: &SoupShared) -> (f64, u32) {
    let npairs = shared.num_pairs();
    let (sum, max) = (0..npairs)
        .into_par_iter()
        .map(|i| shared.pair_steps(i))
        .fold(|| (0u64, 0u32), |(s, m), v| (s + v as u64, m.max(v)))
        .reduce(|| (0u64, 0u32), |(s1, m1), (s2, m2)| (s1 + s2, m1.max(m2)));
    (sum as f64 / npairs as f64, max)
}

/// Compute a stats row for the current arena. `mean_steps`/`max_steps`
/// come from `step_summary` (zero for the epoch-0 row, where no pairs
/// have run yet).
pub fn collect(shared: &SoupShared, epoch: usize, mean_steps: f64, max_steps: u32) -> SoupStats {
    let n = shared.num_tapes();

    // Histogram of per-tape instruction counts over 0..=64
    let hist = (0..n)
        .into_par_iter()
        .fold(
            || [0u32; SINGLE_TAPE_SIZE + 1],
            |mut h, i| {
                let mut tape = [Token::default(); SINGLE_TAPE_SIZE];
                shared.read_tape(i, &mut tape);
                h[bff::count_ops(&tape)] += 1;
                h
            },
        )
        .reduce(
            || [0u32; SINGLE_TAPE_SIZE + 1],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    *x += *y;
                }
                a
            },
        );

    let total_ops: u64 = hist
        .iter()
        .enumerate()
        .map(|(v, &c)| v as u64 * c as u64)
        .sum();
    let mean_ops = total_ops as f64 / n as f64;
    let median_ops = median_from_hist(&hist, n);

    // All token IDs, sorted: unique count and the longest (modal) run
    let total = n * SINGLE_TAPE_SIZE;
    let mut ids: Vec<u32> = Vec::with_capacity(total);
    (0..total)
        .into_par_iter()
        .map(|idx| shared.cell(idx).id())
        .collect_into_vec(&mut ids);
    ids.par_sort_unstable();

    let mut unique = 1u32;
    for i in 1..ids.len() {
        if ids[i] != ids[i - 1] {
            unique += 1;
        }
    }

    let mut modal_id = ids[0];
    let mut modal_count = 0u32;
    let mut run_start = 0usize;
    for i in 1..=ids.len() {
        if i == ids.len() || ids[i] != ids[run_start] {
            let run = (i - run_start) as u32;
            if run > modal_count {
                modal_count = run;
                modal_id = ids[run_start];
            }
            run_start = i;
        }
    }

    // Tape with the most modal-lineage cells; first index wins ties
    let (_, best_tape) = (0..n)
        .into_par_iter()
        .map(|i| {
            let cnt = (0..SINGLE_TAPE_SIZE)
                .filter(|&j| shared.token(i, j).id() == modal_id)
                .count();
            (cnt, i)
        })
        .reduce(
            || (0usize, usize::MAX),
            |a, b| {
                if b.0 > a.0 || (b.0 == a.0 && b.1 < a.1) {
                    b
                } else {
                    a
                }
            },
        );

    let mut rep_tape = [Token::default(); SINGLE_TAPE_SIZE];
    shared.read_tape(best_tape, &mut rep_tape);
    let representative = bff::render_ops(&rep_tape);

    SoupStats {
        epoch,
        mean_ops,
        median_ops,
        mean_steps,
        max_steps,
        unique_ids: unique,
        modal_id,
        modal_count,
        representative,
    }
}

/// Median by counting sort: walk the histogram to the lower and upper
/// middle positions and take their midpoint.
fn median_from_hist(hist: &[u32; SINGLE_TAPE_SIZE + 1], n: usize) -> f64 {
    let pos_lo = n / 2 - 1;
    let pos_hi = n / 2;
    let mut cumul = 0usize;
    let mut lo = None;
    let mut hi = None;
    for (v, &c) in hist.iter().enumerate() {
        cumul += c as usize;
        if lo.is_none() && cumul > pos_lo {
            lo = Some(v);
        }
        if hi.is_none() && cumul > pos_hi {
            hi = Some(v);
            break;
        }
    }
    (lo.unwrap_or(0) + hi.unwrap_or(0)) as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soup::{Soup, SoupParams};
    use crate::token::Token;

    fn fixture_soup(num_tapes: usize) -> Soup {
        Soup::new(SoupParams {
            num_tapes,
            seed: 1,
            num_threads: 1,
            mutation_rate: 0.0,
        })
        .unwrap()
    }

    /// Overwrite a whole tape with one id and a char pattern.
    fn fill_tape(soup: &Soup, tape: usize, id: u32, chars: impl Fn(usize) -> u8) {
        for j in 0..SINGLE_TAPE_SIZE {
            soup.shared().set_token(tape, j, Token::new(id, 0, chars(j)));
        }
    }

    #[test]
    fn test_collect_on_a_handmade_arena() {
        let soup = fixture_soup(4);

        // tape 0: 64 ops, lineage 100
        fill_tape(&soup, 0, 100, |_| b'+');
        // tape 1: 0 ops, lineage 101
        fill_tape(&soup, 1, 101, |_| 0);
        // tape 2: 32 ops, lineage 102
        fill_tape(&soup, 2, 102, |j| if j < 32 { b'<' } else { 1 });
        // tape 3: 0 ops, 10 cells of lineage 100, rest 103
        fill_tape(&soup, 3, 103, |_| b'x');
        for j in 0..10 {
            soup.shared().set_token(3, j, Token::new(100, 0, b'x'));
        }

        let s = collect(soup.shared(), 0, 0.0, 0);

        assert_eq!(s.epoch, 0);
        assert!((s.mean_ops - 24.0).abs() < 1e-12);
        // histogram {0: 2, 32: 1, 64: 1}: lower middle 0, upper middle 32
        assert!((s.median_ops - 16.0).abs() < 1e-12);
        assert_eq!(s.unique_ids, 4);
        assert_eq!(s.modal_id, 100);
        assert_eq!(s.modal_count, 74);
        // tape 0 carries 64 modal cells, tape 3 only 10
        assert_eq!(s.representative, "+".repeat(64));
    }

    #[test]
    fn test_modal_tie_prefers_smaller_id() {
        let soup = fixture_soup(2);
        fill_tape(&soup, 0, 9, |_| 0);
        fill_tape(&soup, 1, 4, |_| 0);

        let s = collect(soup.shared(), 0, 0.0, 0);

        // Both lineages occupy 64 cells; the sorted scan keeps the first
        assert_eq!(s.modal_id, 4);
        assert_eq!(s.modal_count, 64);
        assert_eq!(s.unique_ids, 2);
    }

    #[test]
    fn test_representative_tie_prefers_first_tape() {
        let soup = fixture_soup(4);
        for t in 0..4 {
            fill_tape(&soup, t, 1, |_| 0);
        }
        // Make tapes 1 and 2 equally modal-rich but distinguishable
        fill_tape(&soup, 0, 2, |_| 0);
        fill_tape(&soup, 3, 3, |_| 0);
        for j in 0..SINGLE_TAPE_SIZE {
            soup.shared().set_token(1, j, Token::new(1, 0, b'>'));
            soup.shared().set_token(2, j, Token::new(1, 0, b'<'));
        }

        let s = collect(soup.shared(), 0, 0.0, 0);

        assert_eq!(s.modal_id, 1);
        assert_eq!(s.representative, ">".repeat(64));
    }

    #[test]
    fn test_median_odd_histogram() {
        // All four tapes at the same op count: median is that count
        let soup = fixture_soup(4);
        for t in 0..4 {
            fill_tape(&soup, t, t as u32, |j| if j < 5 { b'.' } else { 0 });
        }
        let s = collect(soup.shared(), 0, 0.0, 0);
        assert!((s.median_ops - 5.0).abs() < 1e-12);
        assert!((s.mean_ops - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_step_summary() {
        let soup = fixture_soup(8);
        let steps = [128u32, 8192, 1, 64, 300, 2, 7, 100];
        // num_pairs is 4; only the first 4 entries are real pairs
        for (i, &v) in steps.iter().take(4).enumerate() {
            soup.shared().set_pair_steps(i, v);
        }

        let (mean, max) = step_summary(soup.shared());
        assert_eq!(max, 8192);
        assert!((mean - (128.0 + 8192.0 + 1.0 + 64.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_row_format() {
        let s = SoupStats {
            epoch: 300,
            mean_ops: 12.5,
            median_ops: 11.0,
            mean_steps: 150.25,
            max_steps: 8192,
            unique_ids: 42,
            modal_id: 7,
            modal_count: 1000,
            representative: "[->+<]".to_string(),
        };
        let row = s.to_row();
        assert!(row.starts_with("300"));
        assert!(row.contains("12.5000"));
        assert!(row.contains("|[->+<]| (1000)"));
        assert_eq!(row.matches('\t').count(), 7);
        assert_eq!(
            SoupStats::header().matches('\t').count(),
            row.matches('\t').count()
        );
    }
}
