//! Importance-sampling tables for an environment map.
//!
//! The image is treated as a piecewise-constant 2D density proportional to
//! luminance and split into a marginal density over rows and a conditional
//! density over columns within each row. The inverse CDFs are tabulated so a
//! shader can turn a uniform `(u, v)` into a pixel without searching.

use bytemuck::{Pod, Zeroable};
use image::{Rgb, Rgb32FImage};

/// One lookup-table entry: the sampled position in `[0, 1]` and the density
/// at the entry's own index.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DistributionEntry {
    pub position: f32,
    pub density: f32,
}

/// Rec. 601 luma weights.
pub fn luminance(pixel: &Rgb<f32>) -> f32 {
    0.299 * pixel[0] + 0.587 * pixel[1] + 0.114 * pixel[2]
}

/// Smallest index whose value is `>= value`, or `values.len()` when none is.
pub fn lower_bound(values: &[f32], value: f32) -> usize {
    let (mut lower, mut upper) = (0, values.len());
    while lower < upper {
        let mid = lower + (upper - lower) / 2;
        if values[mid] < value {
            lower = mid + 1;
        } else {
            upper = mid;
        }
    }
    lower
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvMapDistribution {
    pub width: usize,
    pub height: usize,
    /// Per-pixel density within its row, row-major.
    pub conditional_pdf: Vec<f32>,
    /// Per-row normalized running sums, row-major.
    pub conditional_cdf: Vec<f32>,
    pub marginal_pdf: Vec<f32>,
    pub marginal_cdf: Vec<f32>,
    /// `height` entries: row lookup.
    pub marginal: Vec<DistributionEntry>,
    /// `width * height` entries: column lookup per row.
    pub conditional: Vec<DistributionEntry>,
}

impl EnvMapDistribution {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.marginal.is_empty()
    }

    /// Builds the tables for `image`.
    ///
    /// Rows that sum to zero are divided through anyway and end up NaN; the
    /// lookup for such a row resolves to column 0.
    pub fn build(image: &Rgb32FImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if width == 0 || height == 0 {
            return Self::empty();
        }

        let mut conditional_pdf = vec![0.0f32; width * height];
        let mut conditional_cdf = vec![0.0f32; width * height];
        let mut marginal_pdf = vec![0.0f32; height];
        let mut marginal_cdf = vec![0.0f32; height];

        let mut total = 0.0f32;
        let mut dark_rows = 0usize;
        for (y, row) in image.rows().enumerate() {
            let pdf = &mut conditional_pdf[y * width..(y + 1) * width];
            let cdf = &mut conditional_cdf[y * width..(y + 1) * width];

            let mut row_sum = 0.0f32;
            for (x, pixel) in row.enumerate() {
                let weight = luminance(pixel);
                row_sum += weight;
                pdf[x] = weight;
                cdf[x] = row_sum;
            }

            if row_sum == 0.0 {
                dark_rows += 1;
            }
            pdf.iter_mut().for_each(|v| *v /= row_sum);
            cdf.iter_mut().for_each(|v| *v /= row_sum);

            total += row_sum;
            marginal_pdf[y] = row_sum;
            marginal_cdf[y] = total;
        }

        if dark_rows > 0 {
            log::warn!("Environment map has {} rows with zero luminance", dark_rows);
        }

        marginal_pdf.iter_mut().for_each(|v| *v /= total);
        marginal_cdf.iter_mut().for_each(|v| *v /= total);

        let marginal = (0..height)
            .map(|i| {
                let row = lower_bound(&marginal_cdf, i as f32 / height as f32);
                DistributionEntry {
                    position: row as f32 / height as f32,
                    density: marginal_pdf[i],
                }
            })
            .collect();

        let conditional = (0..height)
            .flat_map(|y| {
                let cdf = &conditional_cdf[y * width..(y + 1) * width];
                let pdf = &conditional_pdf[y * width..(y + 1) * width];
                (0..width).map(move |x| {
                    let col = lower_bound(cdf, x as f32 / width as f32);
                    DistributionEntry {
                        position: col as f32 / width as f32,
                        density: pdf[x],
                    }
                })
            })
            .collect();

        log::info!(
            "Built environment distribution: {}x{}, total luminance {}",
            width,
            height,
            total
        );

        Self {
            width,
            height,
            conditional_pdf,
            conditional_cdf,
            marginal_pdf,
            marginal_cdf,
            marginal,
            conditional,
        }
    }

    pub fn row_cdf(&self, y: usize) -> &[f32] {
        &self.conditional_cdf[y * self.width..(y + 1) * self.width]
    }

    pub fn conditional_row(&self, y: usize) -> &[DistributionEntry] {
        &self.conditional[y * self.width..(y + 1) * self.width]
    }
}
