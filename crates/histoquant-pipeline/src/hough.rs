//! Deterministic line-segment detection on a binary evidence image.
//!
//! A standard (rho, theta) Hough accumulator is built once per evidence
//! image. Each (vote threshold, max gap) configuration then extracts
//! segments from it:
//!
//! 1. Accumulator cells at or above the vote threshold that are local
//!    maxima in their 3x3 neighbourhood become candidate lines, strongest
//!    first.
//! 2. Each candidate line is walked pixel by pixel along its major axis.
//!    Foreground pixels separated by at most `max_gap` background pixels
//!    form one run; runs at least `min_length` long become segments.
//! 3. Pixels covered by an accepted segment (and their perpendicular
//!    neighbours) are consumed so weaker parallel candidates do not
//!    report the same stroke again.
//!
//! There is no random sampling: identical input yields identical
//! segments.

use std::f64::consts::PI;

use image::GrayImage;
use imageproc::point::Point;

/// Number of one-degree theta bins, covering `[0, 180)`.
pub const THETA_BINS: usize = 180;

/// Accumulators larger than this are refused.
const MAX_ACC_BYTES: u64 = 512 * 1024 * 1024;

/// A detected line segment in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First endpoint (smaller coordinate along the walk axis).
    pub start: Point<i32>,
    /// Last endpoint.
    pub end: Point<i32>,
}

impl Segment {
    /// Euclidean length in pixels.
    #[must_use]
    pub fn length(&self) -> f64 {
        let dx = f64::from(self.end.x - self.start.x);
        let dy = f64::from(self.end.y - self.start.y);
        dx.hypot(dy)
    }

    /// Absolute angle against the x axis in degrees, in `[0, 180]`.
    #[must_use]
    pub fn angle_deg(&self) -> f64 {
        let dx = f64::from(self.end.x - self.start.x);
        let dy = f64::from(self.end.y - self.start.y);
        dy.atan2(dx).to_degrees().abs()
    }

    /// Midpoint of the two endpoints.
    #[must_use]
    pub fn midpoint(&self) -> (f64, f64) {
        (
            f64::from(self.start.x + self.end.x) / 2.0,
            f64::from(self.start.y + self.end.y) / 2.0,
        )
    }
}

/// One segment-extraction configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentParams {
    /// Minimum accumulator votes for a candidate line.
    pub vote_threshold: u32,
    /// Maximum run of background pixels bridged inside a segment.
    pub max_gap: u32,
    /// Minimum segment length in pixels.
    pub min_length: f64,
}

/// A candidate line: accumulator cell and its vote count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    /// Theta bin (degrees).
    pub theta: usize,
    /// Rho bin index.
    pub rho_idx: usize,
    /// Accumulated votes.
    pub votes: u32,
}

/// Hough accumulator over the foreground pixels of an evidence image.
#[derive(Debug, Clone)]
pub struct HoughSpace {
    data: Vec<u32>,
    rho_bins: usize,
    max_rho: i64,
    sin_table: Vec<f64>,
    cos_table: Vec<f64>,
}

impl HoughSpace {
    /// Vote every foreground (non-zero) pixel of `evidence` into a new
    /// accumulator.
    ///
    /// Returns `None` for a zero-area image or when the accumulator
    /// would exceed its memory guard.
    #[must_use]
    pub fn accumulate(evidence: &GrayImage) -> Option<Self> {
        let (w, h) = evidence.dimensions();
        if w == 0 || h == 0 {
            return None;
        }

        #[allow(clippy::cast_possible_truncation)]
        let max_rho = f64::from(w).hypot(f64::from(h)).ceil() as i64;
        let rho_bins = usize::try_from(2 * max_rho + 1).ok()?;
        let approx_size = (rho_bins as u64) * (THETA_BINS as u64) * 4;
        if approx_size > MAX_ACC_BYTES {
            log::warn!("Hough accumulator of {approx_size} bytes refused for {w}x{h} image");
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let (sin_table, cos_table): (Vec<f64>, Vec<f64>) = (0..THETA_BINS)
            .map(|t| (t as f64 * PI / 180.0).sin_cos())
            .unzip();

        let mut space = Self {
            data: vec![0; rho_bins * THETA_BINS],
            rho_bins,
            max_rho,
            sin_table,
            cos_table,
        };

        for (x, y, p) in evidence.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let (fx, fy) = (f64::from(x), f64::from(y));
            for theta in 0..THETA_BINS {
                let rho = fx.mul_add(space.cos_table[theta], fy * space.sin_table[theta]);
                let idx = theta * space.rho_bins + space.rho_to_index(rho);
                if let Some(cell) = space.data.get_mut(idx) {
                    *cell = cell.saturating_add(1);
                }
            }
        }

        Some(space)
    }

    #[allow(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )]
    fn rho_to_index(&self, rho: f64) -> usize {
        let idx = rho.round() as i64 + self.max_rho;
        idx.clamp(0, self.rho_bins as i64 - 1) as usize
    }

    #[allow(clippy::cast_precision_loss)]
    fn index_to_rho(&self, index: usize) -> f64 {
        index as f64 - self.max_rho as f64
    }

    fn votes(&self, theta: usize, rho_idx: usize) -> u32 {
        if theta >= THETA_BINS || rho_idx >= self.rho_bins {
            return 0;
        }
        self.data
            .get(theta * self.rho_bins + rho_idx)
            .copied()
            .unwrap_or(0)
    }

    /// Local maxima at or above `threshold`, strongest first.
    ///
    /// A cell is a maximum when no 3x3 neighbour has more votes. Among
    /// equal neighbours only the first in scan order (theta-major) is
    /// kept. Equal-vote peaks keep scan order.
    #[must_use]
    pub fn peaks(&self, threshold: u32) -> Vec<Peak> {
        let mut peaks = Vec::new();
        for theta in 0..THETA_BINS {
            for rho_idx in 0..self.rho_bins {
                let votes = self.votes(theta, rho_idx);
                if votes < threshold || votes == 0 {
                    continue;
                }
                if self.is_local_max(theta, rho_idx, votes) {
                    peaks.push(Peak {
                        theta,
                        rho_idx,
                        votes,
                    });
                }
            }
        }
        peaks.sort_by(|a, b| b.votes.cmp(&a.votes));
        peaks
    }

    fn is_local_max(&self, theta: usize, rho_idx: usize, votes: u32) -> bool {
        for dt in -1isize..=1 {
            for dr in -1isize..=1 {
                if dt == 0 && dr == 0 {
                    continue;
                }
                let (Some(t), Some(r)) = (
                    theta.checked_add_signed(dt),
                    rho_idx.checked_add_signed(dr),
                ) else {
                    continue;
                };
                let other = self.votes(t, r);
                // Earlier scan position wins ties.
                let earlier = (dt, dr) < (0, 0);
                if other > votes || (other == votes && earlier) {
                    return false;
                }
            }
        }
        true
    }
}

/// Extract segments for one configuration.
///
/// `space` must have been accumulated from `evidence`.
#[must_use]
pub fn detect_segments(
    evidence: &GrayImage,
    space: &HoughSpace,
    params: SegmentParams,
) -> Vec<Segment> {
    let (w, h) = evidence.dimensions();
    let mut available: Vec<bool> = evidence.pixels().map(|p| p.0[0] != 0).collect();
    let mut segments = Vec::new();

    for peak in space.peaks(params.vote_threshold) {
        let rho = space.index_to_rho(peak.rho_idx);
        let (sin_t, cos_t) = (space.sin_table[peak.theta], space.cos_table[peak.theta]);
        let walk = LineWalk::new(rho, sin_t, cos_t, w, h);

        for run in walk.runs(&available, w, params.max_gap) {
            let segment = Segment {
                start: run.first,
                end: run.last,
            };
            if segment.length() + f64::EPSILON < params.min_length {
                continue;
            }
            walk.consume(&mut available, w, h, &run);
            segments.push(segment);
        }
    }

    segments
}

/// Detect segments for every (vote threshold, max gap) pair and
/// concatenate them in sweep order.
#[must_use]
pub fn sweep_segments(
    evidence: &GrayImage,
    vote_thresholds: &[u32],
    max_gaps: &[u32],
    min_length: f64,
) -> Vec<Segment> {
    let Some(space) = HoughSpace::accumulate(evidence) else {
        return Vec::new();
    };
    let mut all = Vec::new();
    for &vote_threshold in vote_thresholds {
        for &max_gap in max_gaps {
            let found = detect_segments(
                evidence,
                &space,
                SegmentParams {
                    vote_threshold,
                    max_gap,
                    min_length,
                },
            );
            log::debug!(
                "segments: threshold {vote_threshold}, max gap {max_gap}: {} found",
                found.len()
            );
            all.extend(found);
        }
    }
    all
}

/// Pixels visited along one (rho, theta) line.
struct LineWalk {
    /// Walk along x (mostly horizontal line) or along y.
    along_x: bool,
    points: Vec<Point<i32>>,
}

/// A maximal stretch of foreground along a walk.
struct Run {
    first: Point<i32>,
    last: Point<i32>,
    from: usize,
    to: usize,
}

impl LineWalk {
    fn new(rho: f64, sin_t: f64, cos_t: f64, w: u32, h: u32) -> Self {
        let along_x = sin_t.abs() >= cos_t.abs();
        let mut points = Vec::new();
        if along_x {
            for x in 0..w {
                let y = (f64::from(x).mul_add(-cos_t, rho) / sin_t).round();
                if y >= 0.0 && y < f64::from(h) {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    points.push(Point::new(x as i32, y as i32));
                }
            }
        } else {
            for y in 0..h {
                let x = (f64::from(y).mul_add(-sin_t, rho) / cos_t).round();
                if x >= 0.0 && x < f64::from(w) {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    points.push(Point::new(x as i32, y as i32));
                }
            }
        }
        Self { along_x, points }
    }

    fn is_set(available: &[bool], w: u32, p: Point<i32>) -> bool {
        #[allow(clippy::cast_sign_loss)]
        let idx = p.y as usize * w as usize + p.x as usize;
        available.get(idx).copied().unwrap_or(false)
    }

    /// Runs of available pixels with gaps of at most `max_gap` walk steps.
    fn runs(&self, available: &[bool], w: u32, max_gap: u32) -> Vec<Run> {
        let mut runs = Vec::new();
        let mut current: Option<(usize, usize)> = None;
        let max_step = max_gap as usize + 1;

        for (i, &p) in self.points.iter().enumerate() {
            if !Self::is_set(available, w, p) {
                continue;
            }
            current = match current {
                Some((from, to)) if i - to <= max_step => Some((from, i)),
                Some((from, to)) => {
                    runs.push(self.run(from, to));
                    Some((i, i))
                }
                None => Some((i, i)),
            };
        }
        if let Some((from, to)) = current {
            runs.push(self.run(from, to));
        }
        runs
    }

    fn run(&self, from: usize, to: usize) -> Run {
        Run {
            first: self.points[from],
            last: self.points[to],
            from,
            to,
        }
    }

    /// Clear the pixels of `run` and their perpendicular neighbours.
    fn consume(&self, available: &mut [bool], w: u32, h: u32, run: &Run) {
        for &p in &self.points[run.from..=run.to] {
            for d in -1..=1 {
                let (x, y) = if self.along_x { (p.x, p.y + d) } else { (p.x + d, p.y) };
                if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y))
                    && x < w
                    && y < h
                    && let Some(cell) = available.get_mut(y as usize * w as usize + x as usize)
                {
                    *cell = false;
                }
            }
        }
    }
}
