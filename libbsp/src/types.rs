use crate::io::*;
use crate::io::{Readable, Writable};
use bsp_derive::{Readable, Writable};
use bytes::{Buf, BufMut};
use cgmath::{InnerSpace, Vector3};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::string::FromUtf8Error;

pub type Real = f64;

pub type Point3 = Vector3<Real>;

/// Largest coordinate the editor will ever produce.
pub const WORLD_MAX: Real = 524288.0;
pub const HALF_WORLD_MAX: Real = 262144.0;

pub const MAX_NODE_VERTICES: usize = 16;
/// Split fragments this large are halved before they go further down the tree.
pub const VERTEX_THRESHOLD: usize = MAX_NODE_VERTICES - 2;
pub const MAX_ZONES: usize = 64;

pub const THRESH_POINTS_ARE_SAME: Real = 0.002;
pub const THRESH_POINTS_ARE_NEAR: Real = 0.015;
pub const THRESH_NORMALS_ARE_SAME: Real = 0.00002;
pub const THRESH_VECTORS_ARE_NEAR: Real = 0.0004;
pub const THRESH_SPLIT_POLY_WITH_PLANE: Real = 0.01;
pub const THRESH_SPLIT_POLY_PRECISELY: Real = 0.001;
pub const THRESH_OPTGEOM_COPLANAR: Real = 0.01;
pub const THRESH_OPTGEOM_COSIDAL: Real = 0.01;
pub const THRESH_NORMAL: Real = 0.0001;
pub const THRESH_ZERO_NORM_SQUARED: Real = 0.000_001;

#[derive(Debug, Readable, Writable, Clone, Copy, PartialEq)]
pub struct BoxF {
    pub min: Point3,
    pub max: Point3,
}

#[derive(Debug, Readable, Writable, Clone, Copy, PartialEq)]
pub struct SphereF {
    pub origin: Point3,
    pub radius: Real,
}

/// Plane in `normal . p + distance = 0` form.
#[derive(Debug, Readable, Writable, Clone, Copy, PartialEq)]
pub struct PlaneF {
    pub normal: Point3,
    pub distance: Real,
}

pub type BspResult<T> = Result<T, BspError>;

#[derive(Debug, Clone)]
pub struct BspError {
    pub message: String,
}

/// Component-wise comparison, the way the editor decides two points coincide.
pub fn points_are_near(a: &Point3, b: &Point3, dist: Real) -> bool {
    (a.x - b.x).abs() < dist && (a.y - b.y).abs() < dist && (a.z - b.z).abs() < dist
}

pub fn points_are_same(a: &Point3, b: &Point3) -> bool {
    points_are_near(a, b, THRESH_POINTS_ARE_SAME)
}

impl BoxF {
    /// A box containing nothing; any union replaces it.
    pub fn empty() -> BoxF {
        use std::f64::{INFINITY, NEG_INFINITY};
        BoxF {
            min: Vector3::new(INFINITY, INFINITY, INFINITY),
            max: Vector3::new(NEG_INFINITY, NEG_INFINITY, NEG_INFINITY),
        }
    }
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }
    pub fn center(&self) -> Point3 {
        (self.min + self.max) / 2.0
    }
    pub fn extent(&self) -> Point3 {
        self.max - self.min
    }
    pub fn union(&self, other: &BoxF) -> BoxF {
        BoxF {
            min: Vector3 {
                x: self.min.x.min(other.min.x),
                y: self.min.y.min(other.min.y),
                z: self.min.z.min(other.min.z),
            },
            max: Vector3 {
                x: self.max.x.max(other.max.x),
                y: self.max.y.max(other.max.y),
                z: self.max.z.max(other.max.z),
            },
        }
    }
    pub fn union_point(&self, other: &Point3) -> BoxF {
        BoxF {
            min: Vector3 {
                x: self.min.x.min(other.x),
                y: self.min.y.min(other.y),
                z: self.min.z.min(other.z),
            },
            max: Vector3 {
                x: self.max.x.max(other.x),
                y: self.max.y.max(other.y),
                z: self.max.z.max(other.z),
            },
        }
    }
    pub fn contains(&self, point: &Point3) -> bool {
        point.x >= self.min.x
            && point.y >= self.min.y
            && point.z >= self.min.z
            && point.x <= self.max.x
            && point.y <= self.max.y
            && point.z <= self.max.z
    }

    pub fn from_vertices<'a, I>(vertices: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3>,
    {
        vertices
            .into_iter()
            .fold(BoxF::empty(), |b, vertex| b.union_point(vertex))
    }
}

impl SphereF {
    /// Sphere circumscribing a box.
    pub fn from_box(b: &BoxF) -> Self {
        if !b.is_valid() {
            return SphereF {
                origin: Vector3::new(0.0, 0.0, 0.0),
                radius: 0.0,
            };
        }
        SphereF {
            origin: b.center(),
            radius: (b.extent() / 2.0).magnitude(),
        }
    }
}

impl PlaneF {
    pub fn from_point_normal(base: &Point3, normal: &Point3) -> Self {
        PlaneF {
            normal: *normal,
            distance: -normal.dot(*base),
        }
    }

    pub fn from_triangle(v0: Point3, v1: Point3, v2: Point3) -> Self {
        let normal = (v1 - v0).cross(v2 - v0).normalize();
        PlaneF::from_point_normal(&v0, &normal)
    }

    /// Signed distance of `point`; positive in front.
    pub fn distance_to(&self, point: &Point3) -> Real {
        self.normal.dot(*point) + self.distance
    }

    pub fn flip(&self) -> PlaneF {
        PlaneF {
            normal: -self.normal,
            distance: -self.distance,
        }
    }

    /// Any point lying on the plane.
    pub fn origin(&self) -> Point3 {
        self.normal * -self.distance
    }
}

impl From<&'static str> for BspError {
    fn from(message: &'static str) -> Self {
        BspError {
            message: message.into(),
        }
    }
}

impl From<String> for BspError {
    fn from(message: String) -> Self {
        BspError { message }
    }
}

impl From<FromUtf8Error> for BspError {
    fn from(err: FromUtf8Error) -> Self {
        BspError {
            message: format!("UTF-8 Error: {}", err),
        }
    }
}

impl Display for BspError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "BSP error: {}", self.message)
    }
}

impl Error for BspError {}

impl Readable<Point3> for Point3 {
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<Self> {
        Ok(Point3 {
            x: Real::read(from, version)?,
            y: Real::read(from, version)?,
            z: Real::read(from, version)?,
        })
    }
}

impl Writable<Point3> for Point3 {
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        self.x.write(to, version)?;
        self.y.write(to, version)?;
        self.z.write(to, version)?;
        Ok(())
    }
}
