use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + Default + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(transparent)]
pub struct BBox<F: BBoxFormat> {
    coords: [f32; 4],
    #[serde(skip)]
    format: PhantomData<F>,
}

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.coords
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.coords
    }

    // Use carefully when you REALLY sure that slice have needed format
    #[inline(always)]
    pub fn assigned(slice: &[f32; 4]) -> Self {
        BBox {
            coords: *slice,
            format: PhantomData,
        }
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::assigned(&[x1, y1, x2, y2])
    }

    /// Box of the given size centered on `center`.
    #[inline]
    pub fn around(center: na::Point2<f32>, width: f32, height: f32) -> Self {
        Self::ltrb(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.coords[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.coords[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.coords[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.coords[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.left() + self.right()) / 2.0,
            (self.top() + self.bottom()) / 2.0,
        )
    }

    /// Bottom-center point, where a standing player touches the ground.
    #[inline]
    pub fn foot(&self) -> na::Point2<f32> {
        na::Point2::new((self.left() + self.right()) / 2.0, self.bottom())
    }

    #[inline]
    pub fn mid_y(&self) -> f32 {
        (self.top() + self.bottom()) / 2.0
    }

    /// Intersection over union. Degenerate boxes never overlap anything.
    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        let i_w = (self.right().min(other.right()) - self.left().max(other.left())).max(0.0);
        let i_h = (self.bottom().min(other.bottom()) - self.top().max(other.top())).max(0.0);
        let i_area = i_w * i_h;
        let union = self.area() + other.area() - i_area;

        if union <= f32::EPSILON {
            return 0.0;
        }

        i_area / union
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::assigned(&[cx, cy, w, h])
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.coords[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.coords[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.coords[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.coords[3]
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        let c = v.center();

        Self::xywh(c.x, c.y, v.width(), v.height())
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        Self::ltrb(
            v.cx() - v.width() / 2.,
            v.cy() - v.height() / 2.,
            v.cx() + v.width() / 2.,
            v.cy() + v.height() / 2.,
        )
    }
}
