//! Export-time edge padding.
//!
//! Grows the rendered silhouette outward so texture sampling near the edge
//! never picks up the transparent background, then fills what is left with
//! opaque black.

use image::{Rgba, RgbaImage};

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Extend edge colors by `iterations` rings.
///
/// Each pass reads a snapshot of the previous one: a transparent pixel takes
/// the average color of its 8 neighbours that have alpha > 0. Filled pixels
/// become opaque, so every pass adds exactly one ring. Pixels with no such
/// neighbour are left for a later pass. Returns the number of filled pixels.
pub fn dilate_edges(image: &mut RgbaImage, iterations: u32) -> usize {
    let (width, height) = image.dimensions();
    let mut filled_total = 0;

    for pass in 0..iterations {
        let snapshot = image.clone();
        let mut filled = 0;

        for y in 0..height {
            for x in 0..width {
                if snapshot.get_pixel(x, y)[3] != 0 {
                    continue;
                }
                let mut sum = [0u32; 3];
                let mut count = 0u32;
                for (dx, dy) in NEIGHBOURS {
                    let nx = i64::from(x) + dx;
                    let ny = i64::from(y) + dy;
                    if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
                        continue;
                    }
                    let neighbour = snapshot.get_pixel(nx as u32, ny as u32);
                    if neighbour[3] == 0 {
                        continue;
                    }
                    for channel in 0..3 {
                        sum[channel] += u32::from(neighbour[channel]);
                    }
                    count += 1;
                }
                if count == 0 {
                    continue;
                }
                let average = |channel: usize| ((sum[channel] + count / 2) / count) as u8;
                image.put_pixel(x, y, Rgba([average(0), average(1), average(2), 255]));
                filled += 1;
            }
        }

        tracing::trace!(pass, filled, "dilation pass");
        filled_total += filled;
        if filled == 0 {
            break;
        }
    }

    filled_total
}

/// Replace every fully transparent pixel with opaque black.
pub fn fill_background(image: &mut RgbaImage) -> usize {
    let mut filled = 0;
    for pixel in image.pixels_mut() {
        if pixel[3] == 0 {
            *pixel = Rgba([0, 0, 0, 255]);
            filled += 1;
        }
    }
    filled
}

/// Dilation followed by the background fill, as applied on export.
pub fn pad_edges(image: &mut RgbaImage, padding: u32) {
    let grown = dilate_edges(image, padding);
    let background = fill_background(image);
    tracing::debug!(padding, grown, background, "edge padding applied");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centered_square(canvas: u32, side: u32, color: [u8; 4]) -> RgbaImage {
        let start = (canvas - side) / 2;
        RgbaImage::from_fn(canvas, canvas, |x, y| {
            let inside = (start..start + side).contains(&x) && (start..start + side).contains(&y);
            if inside {
                Rgba(color)
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn opaque_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel[3] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds
    }

    #[test]
    fn square_grows_two_n_per_side() {
        let mut image = centered_square(64, 10, [200, 100, 50, 255]);
        dilate_edges(&mut image, 3);

        let (x0, y0, x1, y1) = opaque_bounds(&image).expect("opaque region");
        assert_eq!((x1 - x0 + 1, y1 - y0 + 1), (16, 16));
        let opaque = image.pixels().filter(|pixel| pixel[3] != 0).count();
        assert_eq!(opaque, 16 * 16);
        // Uniform source color propagates unchanged.
        assert_eq!(image.get_pixel(x0, y0).0, [200, 100, 50, 255]);
    }

    #[test]
    fn leftover_pixels_become_opaque_black() {
        let mut image = centered_square(64, 10, [255, 255, 255, 255]);
        pad_edges(&mut image, 3);

        assert!(image.pixels().all(|pixel| pixel[3] == 255));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(32, 32).0, [255, 255, 255, 255]);
        // Inside the 16x16 padded region the fill is white, not black.
        assert_eq!(image.get_pixel(24, 24).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(23, 23).0, [0, 0, 0, 255]);
    }

    #[test]
    fn fill_averages_opaque_neighbours() {
        let mut image = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 0]));
        image.put_pixel(0, 0, Rgba([100, 0, 0, 255]));
        image.put_pixel(2, 0, Rgba([200, 0, 0, 255]));
        dilate_edges(&mut image, 1);
        assert_eq!(image.get_pixel(1, 0).0, [150, 0, 0, 255]);
    }

    #[test]
    fn zero_iterations_and_empty_images_are_untouched() {
        let mut image = centered_square(8, 2, [9, 9, 9, 255]);
        let before = image.clone();
        assert_eq!(dilate_edges(&mut image, 0), 0);
        assert_eq!(image, before);

        let mut blank = RgbaImage::new(4, 4);
        assert_eq!(dilate_edges(&mut blank, 5), 0);
        assert_eq!(fill_background(&mut blank), 16);
    }
}
