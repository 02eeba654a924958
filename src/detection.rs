//! Fast pixel tests on captured frames
//!
//! These replace OCR where a fixed colour is enough: ability cooldown
//! indicators on the skill bar and the greyed-out retry button.

use image::RgbImage;
use rayon::prelude::*;

use crate::config::SkillBarConfig;
use crate::types::BBox;

/// Each channel within `tolerance` of `target`, bounds inclusive.
pub fn color_matches(pixel: [u8; 3], target: [u8; 3], tolerance: u8) -> bool {
    pixel
        .iter()
        .zip(target.iter())
        .all(|(p, t)| p.abs_diff(*t) <= tolerance)
}

/// Intersection of `region` with the image bounds, or `None` if nothing is left.
pub fn clip_region(img: &RgbImage, region: BBox) -> Option<BBox> {
    let (w, h) = img.dimensions();
    let clipped = BBox::new(
        region.x1.max(0),
        region.y1.max(0),
        region.x2.min(w as i32),
        region.y2.min(h as i32),
    );
    (!clipped.is_empty()).then_some(clipped)
}

/// Whether any pixel inside `region` matches `color`.
pub fn region_contains_color(img: &RgbImage, region: BBox, color: [u8; 3], tolerance: u8) -> bool {
    let Some(r) = clip_region(img, region) else {
        return false;
    };
    (r.y1..r.y2).into_par_iter().any(|y| {
        (r.x1..r.x2).any(|x| color_matches(img.get_pixel(x as u32, y as u32).0, color, tolerance))
    })
}

/// Number of pixels inside `region` matching `color`.
pub fn count_color_pixels(img: &RgbImage, region: BBox, color: [u8; 3], tolerance: u8) -> usize {
    let Some(r) = clip_region(img, region) else {
        return 0;
    };
    (r.y1..r.y2)
        .into_par_iter()
        .map(|y| {
            (r.x1..r.x2)
                .filter(|&x| color_matches(img.get_pixel(x as u32, y as u32).0, color, tolerance))
                .count()
        })
        .sum()
}

/// HSV saturation on the 0-255 scale.
fn saturation(pixel: [u8; 3]) -> f64 {
    let max = pixel.iter().copied().max().unwrap_or(0);
    let min = pixel.iter().copied().min().unwrap_or(0);
    if max == 0 {
        0.0
    } else {
        f64::from(max - min) * 255.0 / f64::from(max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub mean: [f64; 3],
    pub mean_saturation: f64,
}

impl RegionStats {
    /// Largest difference between two channel means.
    pub fn channel_spread(&self) -> f64 {
        let [r, g, b] = self.mean;
        (r - g).abs().max((g - b).abs()).max((b - r).abs())
    }
}

pub fn region_stats(img: &RgbImage, region: BBox) -> Option<RegionStats> {
    let r = clip_region(img, region)?;
    let (sums, sat) = (r.y1..r.y2)
        .into_par_iter()
        .map(|y| {
            let mut sums = [0u64; 3];
            let mut sat = 0.0;
            for x in r.x1..r.x2 {
                let px = img.get_pixel(x as u32, y as u32).0;
                for (sum, channel) in sums.iter_mut().zip(px) {
                    *sum += u64::from(channel);
                }
                sat += saturation(px);
            }
            (sums, sat)
        })
        .reduce(
            || ([0u64; 3], 0.0),
            |(a, sa), (b, sb)| ([a[0] + b[0], a[1] + b[1], a[2] + b[2]], sa + sb),
        );
    let n = (r.width() * r.height()) as f64;
    Some(RegionStats {
        mean: sums.map(|s| s as f64 / n),
        mean_saturation: sat / n,
    })
}

/// A greyed-out button: channel means close together and little saturation.
pub fn region_is_grey(img: &RgbImage, region: BBox, max_spread: f64, max_saturation: f64) -> bool {
    region_stats(img, region)
        .map(|s| s.channel_spread() < max_spread && s.mean_saturation < max_saturation)
        .unwrap_or(false)
}

/// Cooldown indicator layout of the ability bar.
#[derive(Debug, Clone)]
pub struct SkillBar {
    slots: Vec<(char, BBox)>,
    ready_color: [u8; 3],
    tolerance: u8,
    min_pixels: usize,
}

impl SkillBar {
    /// Splits the bar area into a grid, one row per key string, and insets
    /// each cell so that only the icon centre is sampled.
    pub fn from_config(config: &SkillBarConfig) -> Self {
        let rows = config.rows.len().max(1) as i32;
        let cols = config.rows.iter().map(|r| r.chars().count()).max().unwrap_or(1).max(1) as i32;
        let cell_w = config.area.width() / cols;
        let cell_h = config.area.height() / rows;

        let mut slots = Vec::new();
        for (row, keys) in config.rows.iter().enumerate() {
            for (col, key) in keys.chars().enumerate() {
                let x = config.area.x1 + col as i32 * cell_w;
                let y = config.area.y1 + row as i32 * cell_h;
                let cell = BBox::new(
                    x + config.inset_x,
                    y + config.inset_y,
                    x + cell_w - config.inset_x,
                    y + cell_h - config.inset_y,
                );
                slots.push((key, cell));
            }
        }
        Self {
            slots,
            ready_color: config.ready_color,
            tolerance: config.tolerance,
            min_pixels: config.min_ready_pixels,
        }
    }

    pub fn slots(&self) -> &[(char, BBox)] {
        &self.slots
    }

    pub fn keys(&self) -> impl Iterator<Item = char> + '_ {
        self.slots.iter().map(|(k, _)| *k)
    }

    pub fn region(&self, key: char) -> Option<BBox> {
        self.slots.iter().find(|(k, _)| *k == key).map(|(_, b)| *b)
    }

    /// Whether at least `min_pixels` pixels of `region` show the ready colour.
    fn is_ready(&self, frame: &RgbImage, region: BBox) -> bool {
        if self.min_pixels <= 1 {
            return region_contains_color(frame, region, self.ready_color, self.tolerance);
        }
        count_color_pixels(frame, region, self.ready_color, self.tolerance) >= self.min_pixels
    }

    /// Keys whose indicator shows the ready colour, in bar order.
    pub fn ready_skills(&self, frame: &RgbImage) -> Vec<char> {
        self.slots
            .par_iter()
            .filter(|(_, region)| self.is_ready(frame, *region))
            .map(|(key, _)| *key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn paint(img: &mut RgbImage, region: BBox, color: [u8; 3]) {
        for y in region.y1..region.y2 {
            for x in region.x1..region.x2 {
                img.put_pixel(x as u32, y as u32, Rgb(color));
            }
        }
    }

    #[test]
    fn test_color_tolerance_is_inclusive() {
        assert!(color_matches([228, 250, 86], [248, 230, 106], 20));
        assert!(!color_matches([227, 230, 106], [248, 230, 106], 20));
    }

    #[test]
    fn test_region_contains_color() {
        let mut img = RgbImage::new(100, 100);
        paint(&mut img, BBox::new(50, 50, 52, 52), [248, 230, 106]);
        assert!(region_contains_color(&img, BBox::new(40, 40, 60, 60), [250, 228, 100], 20));
        assert!(!region_contains_color(&img, BBox::new(0, 0, 40, 40), [250, 228, 100], 20));
        assert_eq!(count_color_pixels(&img, BBox::new(0, 0, 100, 100), [248, 230, 106], 0), 4);
        // regions outside the frame are clipped rather than panicking
        assert!(!region_contains_color(&img, BBox::new(90, 90, 500, 500), [248, 230, 106], 0));
        assert!(!region_contains_color(&img, BBox::new(200, 200, 300, 300), [248, 230, 106], 0));
    }

    #[test]
    fn test_grey_button() {
        let mut img = RgbImage::new(60, 30);
        paint(&mut img, BBox::new(0, 0, 60, 30), [120, 122, 118]);
        assert!(region_is_grey(&img, BBox::new(0, 0, 60, 30), 10.0, 100.0));

        paint(&mut img, BBox::new(0, 0, 60, 30), [200, 140, 40]);
        let stats = region_stats(&img, BBox::new(0, 0, 60, 30)).unwrap();
        assert!(stats.channel_spread() > 100.0);
        assert!(stats.mean_saturation > 100.0);
        assert!(!region_is_grey(&img, BBox::new(0, 0, 60, 30), 10.0, 100.0));
    }

    #[test]
    fn test_skill_bar_layout() {
        let bar = SkillBar::from_config(&SkillBarConfig::default());
        assert_eq!(bar.slots().len(), 12);
        // 185 / 6 = 30 wide, 59 / 2 = 29 high
        assert_eq!(bar.region('q'), Some(BBox::new(438, 543, 460, 554)));
        assert_eq!(bar.region('a'), Some(BBox::new(438, 572, 460, 583)));
        assert_eq!(bar.region('h'), Some(BBox::new(588, 572, 610, 583)));
        assert_eq!(bar.region('z'), None);
    }

    #[test]
    fn test_ready_skills() {
        let config = SkillBarConfig::default();
        let bar = SkillBar::from_config(&config);
        let mut img = RgbImage::new(1067, 600);
        assert!(bar.ready_skills(&img).is_empty());

        for key in ['w', 'd'] {
            let region = bar.region(key).unwrap();
            paint(&mut img, BBox::new(region.x1 + 2, region.y1 + 2, region.x1 + 4, region.y1 + 4), config.ready_color);
        }
        assert_eq!(bar.ready_skills(&img), vec!['w', 'd']);
    }

    #[test]
    fn test_ready_skills_needs_enough_pixels() {
        let mut config = SkillBarConfig::default();
        config.min_ready_pixels = 5;
        let bar = SkillBar::from_config(&config);
        let mut img = RgbImage::new(1067, 600);

        let w = bar.region('w').unwrap();
        paint(&mut img, BBox::new(w.x1 + 2, w.y1 + 2, w.x1 + 4, w.y1 + 4), config.ready_color);
        let d = bar.region('d').unwrap();
        paint(&mut img, BBox::new(d.x1 + 2, d.y1 + 2, d.x1 + 5, d.y1 + 4), config.ready_color);
        // 4 pixels on 'w' is a speck, 6 on 'd' is enough
        assert_eq!(bar.ready_skills(&img), vec!['d']);
    }
}
