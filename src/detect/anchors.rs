/// Anchor centers for one feature-map stride, row-major with x varying fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorLevel {
    pub stride: u32,
    pub centers: Vec<[f32; 2]>,
}

/// Precomputed anchor centers for every stride of an input resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorGrid {
    pub levels: Vec<AnchorLevel>,
}

impl AnchorGrid {
    /// `center = (x, y) * stride` for each cell of the `input_size / stride`
    /// grid, each repeated `anchors_per_cell` times in a row.
    pub fn new(input_size: u32, strides: &[u32], anchors_per_cell: usize) -> Self {
        let levels = strides
            .iter()
            .map(|&stride| {
                let cells = input_size / stride;
                let mut centers = Vec::with_capacity((cells * cells) as usize * anchors_per_cell);
                for y in 0..cells {
                    for x in 0..cells {
                        let center = [(x * stride) as f32, (y * stride) as f32];
                        centers.extend(std::iter::repeat(center).take(anchors_per_cell));
                    }
                }
                AnchorLevel { stride, centers }
            })
            .collect();
        Self { levels }
    }

    pub fn total_anchors(&self) -> usize {
        self.levels.iter().map(|l| l.centers.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_match_scrfd_layout() {
        let grid = AnchorGrid::new(640, &[8, 16, 32], 2);
        let counts: Vec<usize> = grid.levels.iter().map(|l| l.centers.len()).collect();
        assert_eq!(counts, vec![12800, 3200, 800]);
        assert_eq!(grid.total_anchors(), 16800);
    }

    #[test]
    fn centers_repeat_and_walk_x_first() {
        let grid = AnchorGrid::new(64, &[32], 2);
        assert_eq!(
            grid.levels[0].centers,
            vec![
                [0.0, 0.0],
                [0.0, 0.0],
                [32.0, 0.0],
                [32.0, 0.0],
                [0.0, 32.0],
                [0.0, 32.0],
                [32.0, 32.0],
                [32.0, 32.0],
            ]
        );
    }
}
