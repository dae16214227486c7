/// Core sequencer logic - grid state, timing and the playback engine
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod arpeggiator;
pub mod clock;
pub mod engine;
pub mod playback;
pub mod scale;
pub mod song;

/// Pitch lanes in the grid.
pub const ROWS: usize = 8;
/// Sixteenth-note slots per pattern.
pub const STEPS: usize = 16;

/// Length of one sixteenth note: `60_000 / (bpm * 4)` ms.
pub fn step_period(bpm: u32) -> Duration {
    Duration::from_nanos(15_000_000_000 / u64::from(bpm.max(1)))
}

pub fn step_period_ms(bpm: u32) -> f64 {
    60_000.0 / (f64::from(bpm.max(1)) * 4.0)
}

/// Gate length for a note sounding in a slot of `period`: 90% of it.
pub fn gate(period: Duration) -> Duration {
    period * 9 / 10
}

/// On/off matrix, `ROWS` x `STEPS`. Serialized as rows of 0/1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u8>>", into = "Vec<Vec<u8>>")]
pub struct Grid {
    cells: [[bool; STEPS]; ROWS],
}

impl Grid {
    pub fn new() -> Self {
        Self {
            cells: [[false; STEPS]; ROWS],
        }
    }

    pub fn rows(&self) -> usize {
        ROWS
    }

    pub fn steps(&self) -> usize {
        STEPS
    }

    pub fn get(&self, row: usize, step: usize) -> bool {
        self.cells
            .get(row)
            .and_then(|r| r.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, row: usize, step: usize, value: bool) {
        if let Some(r) = self.cells.get_mut(row) {
            if let Some(cell) = r.get_mut(step) {
                *cell = value;
            }
        }
    }

    pub fn toggle(&mut self, row: usize, step: usize) {
        let current = self.get(row, step);
        self.set(row, step, !current);
    }

    pub fn clear(&mut self) {
        self.cells = [[false; STEPS]; ROWS];
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&on| on).count()
    }

    /// Rows whose cell at `step` is on.
    pub fn column(&self, step: usize) -> impl Iterator<Item = usize> + '_ {
        (0..ROWS).filter(move |&row| self.get(row, step))
    }

    /// Clears the grid, then switches on `count` distinct cells chosen at random.
    pub fn randomize<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) {
        self.clear();
        let mut all: Vec<(usize, usize)> = (0..ROWS)
            .flat_map(|row| (0..STEPS).map(move |step| (row, step)))
            .collect();
        all.shuffle(rng);
        for &(row, step) in all.iter().take(count) {
            self.cells[row][step] = true;
        }
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Grid> for Vec<Vec<u8>> {
    fn from(grid: Grid) -> Self {
        grid.cells
            .iter()
            .map(|row| row.iter().map(|&on| u8::from(on)).collect())
            .collect()
    }
}

impl TryFrom<Vec<Vec<u8>>> for Grid {
    type Error = String;

    fn try_from(rows: Vec<Vec<u8>>) -> Result<Self, Self::Error> {
        if rows.len() != ROWS || rows.iter().any(|r| r.len() != STEPS) {
            return Err(format!("sequence must be {}x{}", ROWS, STEPS));
        }
        let mut grid = Grid::new();
        for (row, cells) in rows.iter().enumerate() {
            for (step, &cell) in cells.iter().enumerate() {
                grid.cells[row][step] = cell != 0;
            }
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_grid_creation() {
        let grid = Grid::new();
        assert_eq!(grid.rows(), 8);
        assert_eq!(grid.steps(), 16);
        assert_eq!(grid.active_count(), 0);
    }

    #[test]
    fn test_grid_toggle() {
        let mut grid = Grid::new();
        assert!(!grid.get(0, 0));
        grid.toggle(0, 0);
        assert!(grid.get(0, 0));
        grid.toggle(0, 0);
        assert!(!grid.get(0, 0));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut grid = Grid::new();
        grid.set(ROWS, 0, true);
        grid.set(0, STEPS, true);
        assert!(!grid.get(ROWS, 0));
        assert_eq!(grid.active_count(), 0);
    }

    #[test]
    fn test_step_period() {
        assert_eq!(step_period(120), Duration::from_millis(125));
        assert_eq!(step_period_ms(120), 125.0);
        for bpm in [40, 60, 100, 120, 150, 200] {
            assert_eq!(step_period(bpm / 2), step_period(bpm) * 2);
            assert_eq!(step_period_ms(bpm / 2), step_period_ms(bpm) * 2.0);
        }
    }

    #[test]
    fn test_gate_is_ninety_percent() {
        assert_eq!(gate(step_period(120)), Duration::from_micros(112_500));
    }

    #[test]
    fn test_randomize_sets_exact_count() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut grid = Grid::new();
        grid.set(3, 3, true);
        grid.randomize(5, &mut rng);
        assert_eq!(grid.active_count(), 5);

        grid.randomize(500, &mut rng);
        assert_eq!(grid.active_count(), ROWS * STEPS);
    }

    #[test]
    fn test_column_lists_active_rows() {
        let mut grid = Grid::new();
        grid.set(1, 4, true);
        grid.set(6, 4, true);
        grid.set(2, 5, true);
        assert_eq!(grid.column(4).collect::<Vec<_>>(), vec![1, 6]);
    }
}
