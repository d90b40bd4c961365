//! MaxRects rectangle bin packing.
//!
//! The free space of the bin is kept as a list of maximal free rectangles
//! that may overlap each other. A placement picks a free rectangle by the
//! chosen heuristic, then every free rectangle it touches is split into the
//! (up to four) maximal residuals around it, and residuals contained in
//! another free rectangle are pruned.

use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle, origin at the top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when `other` lies entirely inside `self`
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right() && other.x < self.right() && self.y < other.bottom() && other.y < self.bottom()
    }
}

/// Rule for choosing the free rectangle a new rectangle goes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreeRectChoiceHeuristic {
    /// Smallest leftover on the shorter side
    #[default]
    BestShortSideFit,
    /// Smallest leftover on the longer side
    BestLongSideFit,
    /// Smallest free rectangle that fits
    BestAreaFit,
    /// Tetris-style lowest placement
    BottomLeft,
    /// Maximise contact with the bin edges and placed rectangles
    ContactPoint,
}

/// Placement candidate; lower scores are better
#[derive(Debug, Clone, Copy)]
struct Candidate {
    rect: Rect,
    primary: i64,
    secondary: i64,
}

#[derive(Debug, Clone)]
pub struct MaxRectsBinPack {
    width: u32,
    height: u32,
    allow_rotation: bool,
    used: Vec<Rect>,
    free: Vec<Rect>,
}

impl MaxRectsBinPack {
    pub fn new(width: u32, height: u32, allow_rotation: bool) -> Self {
        let mut free = Vec::new();
        if width > 0 && height > 0 {
            free.push(Rect::new(0, 0, width, height));
        }
        Self {
            width,
            height,
            allow_rotation,
            used: Vec::new(),
            free,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn used_rects(&self) -> &[Rect] {
        &self.used
    }

    pub fn free_rects(&self) -> &[Rect] {
        &self.free
    }

    /// Place one `width` x `height` rectangle.
    ///
    /// The returned rect has swapped dimensions when it was rotated. Returns
    /// `None` for zero-sized requests and when nothing fits.
    pub fn insert(&mut self, width: u32, height: u32, heuristic: FreeRectChoiceHeuristic) -> Option<Rect> {
        let candidate = self.find_position(width, height, heuristic)?;
        self.place(candidate.rect);
        Some(candidate.rect)
    }

    /// Place a batch, each round committing the request with the best score.
    ///
    /// Results come back in request order; `None` if any request cannot be placed
    /// (the bin keeps whatever was placed before the failure).
    pub fn insert_all(&mut self, sizes: &[(u32, u32)], heuristic: FreeRectChoiceHeuristic) -> Option<Vec<Rect>> {
        let mut placed: Vec<Option<Rect>> = vec![None; sizes.len()];
        let mut pending: Vec<usize> = (0..sizes.len()).collect();

        while !pending.is_empty() {
            let mut best: Option<(usize, Candidate)> = None;
            for (slot, &request) in pending.iter().enumerate() {
                let (w, h) = sizes[request];
                if let Some(candidate) = self.find_position(w, h, heuristic) {
                    let better = best.map_or(true, |(_, b)| {
                        (candidate.primary, candidate.secondary) < (b.primary, b.secondary)
                    });
                    if better {
                        best = Some((slot, candidate));
                    }
                }
            }
            let (slot, candidate) = best?;
            self.place(candidate.rect);
            placed[pending.swap_remove(slot)] = Some(candidate.rect);
        }

        placed.into_iter().collect()
    }

    /// Used area divided by bin area, in [0, 1]
    pub fn occupancy(&self) -> f64 {
        let bin = self.width as u64 * self.height as u64;
        if bin == 0 {
            return 0.0;
        }
        let used: u64 = self.used.iter().map(Rect::area).sum();
        (used as f64 / bin as f64).min(1.0)
    }

    fn find_position(&self, width: u32, height: u32, heuristic: FreeRectChoiceHeuristic) -> Option<Candidate> {
        if width == 0 || height == 0 {
            return None;
        }
        let mut best: Option<Candidate> = None;
        for free in &self.free {
            let mut orientations = vec![(width, height)];
            if self.allow_rotation && width != height {
                orientations.push((height, width));
            }
            for (w, h) in orientations {
                if w > free.width || h > free.height {
                    continue;
                }
                let rect = Rect::new(free.x, free.y, w, h);
                let (primary, secondary) = self.score(free, &rect, heuristic);
                let better = best.map_or(true, |b| (primary, secondary) < (b.primary, b.secondary));
                if better {
                    best = Some(Candidate { rect, primary, secondary });
                }
            }
        }
        best
    }

    fn score(&self, free: &Rect, rect: &Rect, heuristic: FreeRectChoiceHeuristic) -> (i64, i64) {
        let leftover_h = (free.width - rect.width) as i64;
        let leftover_v = (free.height - rect.height) as i64;
        let short = leftover_h.min(leftover_v);
        let long = leftover_h.max(leftover_v);
        match heuristic {
            FreeRectChoiceHeuristic::BestShortSideFit => (short, long),
            FreeRectChoiceHeuristic::BestLongSideFit => (long, short),
            FreeRectChoiceHeuristic::BestAreaFit => (free.area() as i64 - rect.area() as i64, short),
            FreeRectChoiceHeuristic::BottomLeft => (rect.bottom() as i64, rect.x as i64),
            FreeRectChoiceHeuristic::ContactPoint => (-(self.contact_score(rect) as i64), 0),
        }
    }

    fn contact_score(&self, rect: &Rect) -> u64 {
        let mut score = 0u64;
        if rect.x == 0 || rect.right() == self.width {
            score += rect.height as u64;
        }
        if rect.y == 0 || rect.bottom() == self.height {
            score += rect.width as u64;
        }
        for used in &self.used {
            if used.x == rect.right() || used.right() == rect.x {
                score += common_interval(used.y, used.bottom(), rect.y, rect.bottom());
            }
            if used.y == rect.bottom() || used.bottom() == rect.y {
                score += common_interval(used.x, used.right(), rect.x, rect.right());
            }
        }
        score
    }

    fn place(&mut self, node: Rect) {
        let mut residuals = Vec::new();
        self.free.retain(|free| !split_free_node(free, &node, &mut residuals));
        self.free.extend(residuals);
        self.prune_free_list();
        self.used.push(node);
    }

    /// Drop free rectangles contained in another one
    fn prune_free_list(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let mut removed_i = false;
            let mut j = i + 1;
            while j < self.free.len() {
                if self.free[j].contains(&self.free[i]) {
                    self.free.swap_remove(i);
                    removed_i = true;
                    break;
                }
                if self.free[i].contains(&self.free[j]) {
                    self.free.swap_remove(j);
                } else {
                    j += 1;
                }
            }
            if !removed_i {
                i += 1;
            }
        }
    }
}

fn common_interval(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> u64 {
    if a_end < b_start || b_end < a_start {
        return 0;
    }
    (a_end.min(b_end) - a_start.max(b_start)) as u64
}

/// Split `free` around `used`; returns false when they do not overlap
fn split_free_node(free: &Rect, used: &Rect, out: &mut Vec<Rect>) -> bool {
    if !free.intersects(used) {
        return false;
    }

    if used.x < free.right() && used.right() > free.x {
        // above
        if used.y > free.y && used.y < free.bottom() {
            out.push(Rect::new(free.x, free.y, free.width, used.y - free.y));
        }
        // below
        if used.bottom() < free.bottom() {
            out.push(Rect::new(free.x, used.bottom(), free.width, free.bottom() - used.bottom()));
        }
    }

    if used.y < free.bottom() && used.bottom() > free.y {
        // left
        if used.x > free.x && used.x < free.right() {
            out.push(Rect::new(free.x, free.y, used.x - free.x, free.height));
        }
        // right
        if used.right() < free.right() {
            out.push(Rect::new(used.right(), free.y, free.right() - used.right(), free.height));
        }
    }

    true
}
