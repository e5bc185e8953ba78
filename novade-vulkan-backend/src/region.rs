//! Rectangles and regions in image coordinates.
//!
//! A [`Region`] is a set of pairwise disjoint rectangles, the same shape a
//! damage or clip region has on the compositor side. Rectangles are half-open:
//! `(x1, y1)` is the first covered pixel and `(x2, y2)` is one past the last.

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The rectangle covering a whole `width` x `height` image.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, clamp_to_i32(width), clamp_to_i32(height))
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() { 0 } else { self.x2.abs_diff(self.x1) }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() { 0 } else { self.y2.abs_diff(self.y1) }
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        (!rect.is_empty()).then_some(rect)
    }

    /// Shifts by `(dx, dy)`. Edges saturate at the `i32` range, so a
    /// rectangle pushed entirely past it comes out empty.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x1.saturating_add(dx),
            self.y1.saturating_add(dy),
            self.x2.saturating_add(dx),
            self.y2.saturating_add(dy),
        )
    }

    fn overlaps(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }
}

fn clamp_to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// A set of non-overlapping rectangles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    rects: SmallVec<[Rect; 4]>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self::from_rects([rect])
    }

    /// Builds a region from rectangles the caller guarantees to be disjoint.
    /// Empty rectangles are dropped.
    pub fn from_rects(rects: impl IntoIterator<Item = Rect>) -> Self {
        let rects: SmallVec<[Rect; 4]> = rects.into_iter().filter(|r| !r.is_empty()).collect();
        debug_assert!(
            rects
                .iter()
                .enumerate()
                .all(|(i, a)| rects[i + 1..].iter().all(|b| !a.overlaps(b))),
            "region rectangles must not overlap: {rects:?}"
        );
        Self { rects }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Bounding box of all rectangles, `None` for an empty region.
    pub fn extents(&self) -> Option<Rect> {
        self.rects.iter().copied().reduce(|a, b| {
            Rect::new(a.x1.min(b.x1), a.y1.min(b.y1), a.x2.max(b.x2), a.y2.max(b.y2))
        })
    }

    pub fn intersect_rect(&self, clip: &Rect) -> Region {
        Region {
            rects: self.rects.iter().filter_map(|r| r.intersect(clip)).collect(),
        }
    }

    /// Pairwise intersection. Both inputs are disjoint sets, so the pieces
    /// are disjoint as well.
    pub fn intersect(&self, other: &Region) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .flat_map(|a| other.rects.iter().filter_map(move |b| a.intersect(b)))
                .collect(),
        }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect(),
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn disjoint_rects_do_not_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.intersect(&Rect::new(10, 0, 20, 10)), None);
        assert_eq!(a.intersect(&Rect::new(5, 5, 15, 15)), Some(Rect::new(5, 5, 10, 10)));
    }

    #[test]
    fn empty_rects_are_dropped() {
        let region = Region::from_rects([Rect::new(0, 0, 0, 10), Rect::new(3, 3, 4, 4)]);
        assert_eq!(region.rects(), &[Rect::new(3, 3, 4, 4)]);
    }

    #[test]
    fn intersecting_with_bounds_clips_each_rect() {
        let mask = Region::from_rects([Rect::new(-5, -5, 5, 5), Rect::new(15, 0, 30, 10)]);
        let clipped = mask.intersect_rect(&Rect::from_size(20, 20));
        assert_eq!(clipped.rects(), &[Rect::new(0, 0, 5, 5), Rect::new(15, 0, 20, 10)]);
        assert_eq!(clipped.extents(), Some(Rect::new(0, 0, 20, 10)));
    }

    #[test]
    fn intersection_outside_bounds_is_empty() {
        let mask = Region::from_rect(Rect::new(100, 100, 120, 120));
        let clipped = mask.intersect_rect(&Rect::from_size(20, 20));
        assert!(clipped.is_empty());
        assert_eq!(clipped.extents(), None);
    }

    #[test]
    fn region_intersection_is_pairwise() {
        let a = Region::from_rects([Rect::new(0, 0, 10, 10), Rect::new(20, 0, 30, 10)]);
        let b = Region::from_rect(Rect::new(5, 0, 25, 5));
        assert_eq!(
            a.intersect(&b).rects(),
            &[Rect::new(5, 0, 10, 5), Rect::new(20, 0, 25, 5)]
        );
    }

    #[test]
    fn translate_moves_every_rect() {
        let region = Region::from_rect(Rect::new(0, 0, 4, 4)).translate(-5, 5);
        assert_eq!(region.rects(), &[Rect::new(-5, 5, -1, 9)]);
    }

    #[test]
    fn translation_saturates_at_the_coordinate_range() {
        let rect = Rect::new(0, 0, 10, 10);
        assert!(rect.translate(i32::MAX, 0).is_empty());
        assert!(rect.translate(0, i32::MIN).translate(0, i32::MIN).is_empty());
        assert_eq!(rect.translate(i32::MAX - 5, 0), Rect::new(i32::MAX - 5, 0, i32::MAX, 10));
    }

    #[test]
    fn full_range_rect_has_exact_width() {
        let rect = Rect::new(i32::MIN, 0, i32::MAX, 1);
        assert_eq!(rect.width(), u32::MAX);
        assert_eq!(Rect::new(5, 5, 1, 1).height(), 0);
    }

    #[test]
    fn size_saturates_at_i32_max() {
        assert_eq!(Rect::from_size(u32::MAX, 1).x2, i32::MAX);
    }
}
