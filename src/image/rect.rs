//! Rectangle types.
//!
//! These describe letterboxed network inputs, detected palms and the (rotated) hand regions that
//! are fed to the landmark network.

use std::fmt;

use nalgebra::{Rotation2, Vector2};

use super::AspectRatio;

pub type Vec2 = Vector2<f32>;

/// An axis-aligned rectangle.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Vec2,
    size: Vec2,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Vec2::new(x_center, y_center),
            size: Vec2::new(width, height),
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self::from_center(
            top_left_x + width * 0.5,
            top_left_y + height * 0.5,
            width,
            height,
        )
    }

    /// Computes the axis-aligned bounding rectangle that encompasses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = Vec2>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();

        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for pt in iter {
            min = min.inf(&pt);
            max = max.sup(&pt);
        }

        let size = max - min;
        Some(Self::from_top_left(min.x, min.y, size.x, size.y))
    }

    /// Scales the width and height of this [`Rect`] by the given amount, keeping its center.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Symmetrically extends one dimension of `self` so that the resulting rectangle has the given
    /// aspect ratio.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target_aspect: AspectRatio) -> Self {
        let mut res = *self;
        let target_width = self.height() * target_aspect.as_f32();
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / target_aspect.as_f32();
        }
        res
    }

    #[inline]
    pub fn top_left(&self) -> Vec2 {
        self.center - self.size * 0.5
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.top_left().x
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.top_left().y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.size
    }

    #[must_use]
    pub fn move_by(&self, offset: Vec2) -> Rect {
        Rect {
            center: self.center + offset,
            ..*self
        }
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// Returns [`None`] when the rectangles do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.top_left().sup(&other.top_left());
        let max = (self.top_left() + self.size).inf(&(other.top_left() + other.size));
        if min.x > max.x || min.y > max.y {
            return None;
        }

        Rect::bounding([min, max])
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    ///
    /// Returns 0.0 if both rectangles are empty.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection(other).map_or(0.0, |rect| rect.area());
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    pub fn contains_point(&self, p: Vec2) -> bool {
        let tl = self.top_left();
        tl.x <= p.x && tl.y <= p.y && tl.x + self.width() >= p.x && tl.y + self.height() >= p.y
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}

/// A [`Rect`], rotated around its center.
///
/// In image coordinates (Y pointing down), a positive angle rotates the rectangle clockwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Computes the rotated rectangle with the given rotation that encloses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = Vec2>>(radians: f32, points: I) -> Option<Self> {
        // Rotate everything into the rectangle's frame, take the axis-aligned bounds there, then
        // rotate the center back out.
        let into_frame = Rotation2::new(-radians);
        let bounds = Rect::bounding(points.into_iter().map(|p| into_frame * p))?;
        let center = Rotation2::new(radians) * bounds.center();

        Some(Self::new(
            Rect::from_center(center.x, center.y, bounds.width(), bounds.height()),
            radians,
        ))
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Applies a closure to the underlying non-rotated [`Rect`].
    #[must_use]
    pub fn map(mut self, f: impl FnOnce(Rect) -> Rect) -> Self {
        self.rect = f(self.rect);
        self
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.rect.center()
    }

    /// Moves the rectangle along its own (rotated) axes.
    ///
    /// `dx` and `dy` are fractions of the rectangle's width and height.
    #[must_use]
    pub fn shift_rel(&self, dx: f32, dy: f32) -> Self {
        let local = Vec2::new(dx * self.rect.width(), dy * self.rect.height());
        let offset = Rotation2::new(self.radians) * local;
        self.map(|rect| rect.move_by(offset))
    }

    /// Makes the rectangle square by extending its shorter side to the length of the longer one.
    #[must_use]
    pub fn square_long_side(&self) -> Self {
        self.map(|rect| rect.grow_to_fit_aspect(AspectRatio::SQUARE))
    }

    /// Returns the axis-aligned rectangle enclosing all four rotated corners.
    pub fn axis_aligned_bounds(&self) -> Rect {
        let (w, h) = (self.rect.width(), self.rect.height());
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(w, 0.0),
            Vec2::new(w, h),
            Vec2::new(0.0, h),
        ];
        // Non-empty array, so `bounding` always succeeds.
        Rect::bounding(corners.map(|c| self.transform_out(c))).unwrap_or(self.rect)
    }

    /// Transforms a point from the parent coordinate system into the rectangle's system.
    ///
    /// The origin of the inner coordinate system is the top left corner of the rectangle.
    pub fn transform_in(&self, pt: Vec2) -> Vec2 {
        let half = self.rect.size() * 0.5;
        Rotation2::new(-self.radians) * (pt - self.rect.center()) + half
    }

    /// Transforms a point from the rectangle's coordinate system to the parent system.
    ///
    /// The origin of the inner coordinate system is the top left corner of the rectangle.
    pub fn transform_out(&self, pt: Vec2) -> Vec2 {
        let half = self.rect.size() * 0.5;
        Rotation2::new(self.radians) * (pt - half) + self.rect.center()
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn iou() {
        let a = Rect::from_top_left(0.0, 0.0, 2.0, 2.0);
        let b = Rect::from_top_left(1.0, 0.0, 2.0, 2.0);
        assert_abs_diff_eq!(a.iou(&a), 1.0);
        assert_abs_diff_eq!(a.iou(&b), 2.0 / 6.0);
        assert_eq!(a.iou(&Rect::from_top_left(5.0, 5.0, 1.0, 1.0)), 0.0);

        let empty = Rect::from_center(0.0, 0.0, 0.0, 0.0);
        assert_eq!(empty.iou(&empty), 0.0);
    }

    #[test]
    fn fit_aspect() {
        let rect =
            Rect::from_center(10.0, 10.0, 50.0, 100.0).grow_to_fit_aspect(AspectRatio::SQUARE);
        assert_eq!(rect, Rect::from_center(10.0, 10.0, 100.0, 100.0));
        let rect =
            Rect::from_center(10.0, 10.0, 100.0, 50.0).grow_to_fit_aspect(AspectRatio::SQUARE);
        assert_eq!(rect, Rect::from_center(10.0, 10.0, 100.0, 100.0));
    }

    #[test]
    fn transform_round_trip() {
        let rect = RotatedRect::new(Rect::from_center(40.0, 30.0, 20.0, 10.0), 0.7);
        for pt in [
            Vec2::new(0.0, 0.0),
            Vec2::new(20.0, 10.0),
            Vec2::new(-3.0, 17.5),
        ] {
            let back = rect.transform_in(rect.transform_out(pt));
            assert_abs_diff_eq!(back.x, pt.x, epsilon = 1e-4);
            assert_abs_diff_eq!(back.y, pt.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn transform_unrotated() {
        let rect = RotatedRect::from(Rect::from_top_left(5.0, 7.0, 10.0, 10.0));
        assert_eq!(rect.transform_out(Vec2::new(0.0, 0.0)), Vec2::new(5.0, 7.0));
        assert_eq!(rect.transform_in(Vec2::new(15.0, 17.0)), Vec2::new(10.0, 10.0));
    }

    #[test]
    fn quarter_turn() {
        // Rotated by 90° clockwise (in Y-down coordinates), the local X axis points down.
        let rect = RotatedRect::new(Rect::from_center(0.0, 0.0, 2.0, 2.0), FRAC_PI_2);
        let p = rect.transform_out(Vec2::new(2.0, 1.0));
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn bounding_rotated() {
        let points = [
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ];
        let rect = RotatedRect::bounding(PI, points).unwrap();
        assert_abs_diff_eq!(rect.center().x, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rect.center().y, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rect.rect().width(), 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rect.rect().height(), 2.0, epsilon = 1e-5);

        assert!(RotatedRect::bounding(0.0, []).is_none());
    }

    #[test]
    fn shift_follows_rotation() {
        let rect = RotatedRect::new(Rect::from_center(0.0, 0.0, 4.0, 4.0), FRAC_PI_2);
        let shifted = rect.shift_rel(0.0, -0.5);
        // Local "up" points towards +X after a quarter turn.
        assert_abs_diff_eq!(shifted.center().x, 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(shifted.center().y, 0.0, epsilon = 1e-5);
    }
}
