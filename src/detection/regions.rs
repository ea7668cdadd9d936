//! Foreground mask operations.
//!
//! Thresholding, morphological dilation and connected-component bounding
//! boxes over a row-major binary mask (`0` background, `1` foreground).

use serde::Serialize;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Box area in square pixels.
    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Marks pixels whose difference exceeds `threshold`.
pub fn binarize(diff: &[u8], threshold: u8) -> Vec<u8> {
    diff.iter().map(|&d| u8::from(d > threshold)).collect()
}

/// Dilates `mask` with a 3x3 square, `iterations` times.
///
/// The square kernel is separable, so each pass is a horizontal then a
/// vertical 3-tap max.
pub fn dilate(mask: &[u8], width: usize, height: usize, iterations: u32) -> Vec<u8> {
    let mut current = mask.to_vec();
    let mut scratch = vec![0u8; current.len()];

    for _ in 0..iterations {
        for y in 0..height {
            let row = &current[y * width..(y + 1) * width];
            let out = &mut scratch[y * width..(y + 1) * width];
            for x in 0..width {
                let lo = x.saturating_sub(1);
                let hi = (x + 1).min(width - 1);
                out[x] = row[lo..=hi].iter().copied().max().unwrap_or(0);
            }
        }
        for y in 0..height {
            let lo = y.saturating_sub(1);
            let hi = (y + 1).min(height - 1);
            for x in 0..width {
                current[y * width + x] = (lo..=hi)
                    .map(|yy| scratch[yy * width + x])
                    .max()
                    .unwrap_or(0);
            }
        }
    }

    current
}

/// Bounding boxes of the 8-connected foreground components of `mask`.
///
/// Boxes are returned in raster order of each component's first pixel.
pub fn components(mask: &[u8], width: usize, height: usize) -> Vec<BoundingBox> {
    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut boxes = Vec::new();

    for start in 0..mask.len() {
        if mask[start] == 0 || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        while let Some(index) = stack.pop() {
            let (x, y) = (index % width, index / width);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let neighbour = ny * width + nx;
                    if mask[neighbour] != 0 && !visited[neighbour] {
                        visited[neighbour] = true;
                        stack.push(neighbour);
                    }
                }
            }
        }

        boxes.push(BoundingBox {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        });
    }

    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mask_from(rows: &[&str]) -> (Vec<u8>, usize, usize) {
        let width = rows[0].len();
        let mask = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| u8::from(b == b'#')))
            .collect();
        (mask, width, rows.len())
    }

    #[test]
    fn test_binarize_is_strict() {
        assert_eq!(binarize(&[9, 10, 11, 255], 10), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_dilate_grows_single_pixel() {
        let (mask, w, h) = mask_from(&[".....", ".....", "..#..", ".....", "....."]);

        let once = dilate(&mask, w, h, 1);
        assert_eq!(once.iter().filter(|&&v| v == 1).count(), 9);

        let twice = dilate(&mask, w, h, 2);
        assert!(twice.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_dilate_zero_iterations_is_identity() {
        let (mask, w, h) = mask_from(&["#..", "..#"]);
        assert_eq!(dilate(&mask, w, h, 0), mask);
    }

    #[test]
    fn test_components_use_eight_connectivity() {
        let (mask, w, h) = mask_from(&["#....", ".#...", "....#", "....#"]);
        let boxes = components(&mask, w, h);

        assert_eq!(
            boxes,
            vec![
                BoundingBox {
                    x: 0,
                    y: 0,
                    width: 2,
                    height: 2
                },
                BoundingBox {
                    x: 4,
                    y: 2,
                    width: 1,
                    height: 2
                },
            ]
        );
    }

    #[test]
    fn test_dilation_merges_nearby_blobs() {
        let (mask, w, h) = mask_from(&["#.#..", ".....", "....."]);
        assert_eq!(components(&mask, w, h).len(), 2);

        let merged = dilate(&mask, w, h, 1);
        assert_eq!(components(&merged, w, h).len(), 1);
    }

    proptest! {
        #[test]
        fn prop_boxes_stay_inside_frame(
            width in 1usize..24,
            height in 1usize..24,
            seed in proptest::collection::vec(any::<bool>(), 576),
        ) {
            let mask: Vec<u8> = seed[..width * height].iter().map(|&b| u8::from(b)).collect();
            let foreground = mask.iter().filter(|&&v| v == 1).count();
            let boxes = components(&mask, width, height);

            let mut covered = 0u64;
            for b in &boxes {
                prop_assert!(b.width >= 1 && b.height >= 1);
                prop_assert!((b.x + b.width) as usize <= width);
                prop_assert!((b.y + b.height) as usize <= height);
                covered += b.area();
            }
            prop_assert!(covered >= foreground as u64);
            prop_assert_eq!(boxes.is_empty(), foreground == 0);
        }
    }
}
