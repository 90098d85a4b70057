//! Stage positions and acquisition grids.

/// XY stage coordinate in microns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePosition {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl StagePosition {
    /// Position at `(x, y)`.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for StagePosition {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Snake-ordered tiling starting at `origin`.
///
/// Rows advance by `row_step` in +y. Columns advance by `col_step` in -x on
/// even rows and come back on odd rows, so consecutive fields are always
/// neighbours and the stage never makes a long return move.
pub fn serpentine_grid(
    origin: StagePosition,
    cols: usize,
    rows: usize,
    col_step: f64,
    row_step: f64,
) -> Vec<StagePosition> {
    let mut grid = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        let y = origin.y + row as f64 * row_step;
        for i in 0..cols {
            let col = if row % 2 == 0 { i } else { cols - i - 1 };
            grid.push(StagePosition::new(origin.x - col as f64 * col_step, y));
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serpentine_order() {
        let grid = serpentine_grid(StagePosition::new(100.0, 50.0), 3, 2, 10.0, 20.0);
        let expected = [
            (100.0, 50.0),
            (90.0, 50.0),
            (80.0, 50.0),
            (80.0, 70.0),
            (90.0, 70.0),
            (100.0, 70.0),
        ];
        assert_eq!(grid.len(), expected.len());
        for (position, (x, y)) in grid.iter().zip(expected) {
            assert_eq!(*position, StagePosition::new(x, y));
        }
    }

    #[test]
    fn test_empty_grid() {
        assert!(serpentine_grid(StagePosition::new(0.0, 0.0), 0, 4, 1.0, 1.0).is_empty());
    }
}
