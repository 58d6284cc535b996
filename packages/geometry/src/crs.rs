//! Coordinate references and reprojection between them.
//!
//! Supports geographic ETRS89/WGS84 and the northern UTM zones of both
//! datums, which covers everything the cadastral archives are published
//! in. ETRS89 and WGS84 are treated as the same datum; only the ellipsoid
//! flattening differs. Projection uses the transverse Mercator series from
//! Snyder, *Map Projections: A Working Manual* (USGS PP 1395), which is
//! accurate to millimetres inside a zone and to centimetres a few zones
//! away.

use geo::{Coord, MapCoords as _, MultiPolygon};

const UTM_SCALE_FACTOR: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
/// Shared by GRS80 and WGS84.
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ellipsoid {
    /// GRS80 (ETRS89).
    Grs80,
    /// WGS84.
    Wgs84,
}

impl Ellipsoid {
    const fn flattening(self) -> f64 {
        match self {
            Self::Grs80 => 1.0 / 298.257_222_101,
            Self::Wgs84 => 1.0 / 298.257_223_563,
        }
    }

    /// First eccentricity squared.
    fn e2(self) -> f64 {
        let f = self.flattening();
        f * (2.0 - f)
    }
}

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude in degrees.
    Geographic {
        /// EPSG code (4258 or 4326).
        epsg: u32,
    },
    /// Universal Transverse Mercator, northern hemisphere.
    Utm {
        /// EPSG code.
        epsg: u32,
        /// Zone number, 1 to 60.
        zone: u8,
        /// Ellipsoid of the datum.
        ellipsoid: Ellipsoid,
    },
}

impl Crs {
    /// Resolves an EPSG code, or `None` if it is not supported.
    #[must_use]
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            4258 | 4326 => Some(Self::Geographic { epsg }),
            25801..=25860 => Some(Self::Utm {
                epsg,
                zone: u8::try_from(epsg - 25800).ok()?,
                ellipsoid: Ellipsoid::Grs80,
            }),
            32601..=32660 => Some(Self::Utm {
                epsg,
                zone: u8::try_from(epsg - 32600).ok()?,
                ellipsoid: Ellipsoid::Wgs84,
            }),
            _ => None,
        }
    }

    /// Returns the EPSG code.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Geographic { epsg } | Self::Utm { epsg, .. } => epsg,
        }
    }

    /// Whether coordinates are angular (degrees).
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Geographic { .. })
    }

    fn to_lon_lat(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Geographic { .. } => c,
            Self::Utm {
                zone, ellipsoid, ..
            } => utm_inverse(c, zone, ellipsoid),
        }
    }

    fn from_lon_lat(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Geographic { .. } => c,
            Self::Utm {
                zone, ellipsoid, ..
            } => utm_forward(c, zone, ellipsoid),
        }
    }
}

/// A reference parsed from a GML `srsName` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrsName {
    /// EPSG code.
    pub epsg: u32,
    /// Whether coordinates are written latitude first.
    pub lat_lon_order: bool,
}

/// Parses an `srsName` value.
///
/// Recognizes `EPSG:n`, `urn:ogc:def:crs:EPSG::n` (with or without a
/// version), `http://www.opengis.net/def/crs/EPSG/0/n` and the legacy
/// `http://www.opengis.net/gml/srs/epsg.xml#n`. The URN and `def/crs` URI
/// forms follow the EPSG axis order, so geographic references in those
/// forms are latitude first.
#[must_use]
pub fn parse_srs_name(value: &str) -> Option<SrsName> {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();

    let (code, authority_axes) = if lower.starts_with("urn:ogc:def:crs:epsg:") {
        (value.rsplit(':').next()?, true)
    } else if lower.contains("opengis.net/def/crs/epsg/") {
        (value.rsplit('/').next()?, true)
    } else if let Some((_, code)) = value.split_once('#') {
        (code, false)
    } else if lower.starts_with("epsg:") {
        (&value[5..], false)
    } else {
        return None;
    };

    let epsg: u32 = code.trim().parse().ok()?;
    let lat_lon_order = authority_axes && Crs::from_epsg(epsg).is_some_and(Crs::is_geographic);

    Some(SrsName {
        epsg,
        lat_lon_order,
    })
}

/// Converts geometry from one reference to another.
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    from: Crs,
    to: Crs,
}

impl Reprojector {
    /// Creates a reprojector between two references.
    #[must_use]
    pub const fn new(from: Crs, to: Crs) -> Self {
        Self { from, to }
    }

    /// Whether source and target are the same reference.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Converts a single coordinate.
    #[must_use]
    pub fn transform_coord(&self, c: Coord<f64>) -> Coord<f64> {
        if self.is_identity() {
            return c;
        }
        self.to.from_lon_lat(self.from.to_lon_lat(c))
    }

    /// Converts every coordinate of a multipolygon.
    #[must_use]
    pub fn transform(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if self.is_identity() {
            return geometry.clone();
        }
        geometry.map_coords(|c| self.transform_coord(c))
    }
}

fn central_meridian(zone: u8) -> f64 {
    f64::from(zone).mul_add(6.0, -183.0).to_radians()
}

/// Meridian arc length from the equator to `phi`.
fn meridian_arc(a: f64, e2: f64, phi: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Geographic degrees to UTM metres.
fn utm_forward(c: Coord<f64>, zone: u8, ellipsoid: Ellipsoid) -> Coord<f64> {
    let a = SEMI_MAJOR_AXIS;
    let e2 = ellipsoid.e2();
    let ep2 = e2 / (1.0 - e2);
    let k0 = UTM_SCALE_FACTOR;

    let phi = c.y.to_radians();
    let lambda = c.x.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let cc = ep2 * cos_phi * cos_phi;
    let aa = (lambda - central_meridian(zone)) * cos_phi;
    let m = meridian_arc(a, e2, phi);

    let x = k0
        * n
        * (aa
            + (1.0 - t + cc) * aa.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * cc - 58.0 * ep2) * aa.powi(5) / 120.0);
    let y = k0
        * (m + n
            * tan_phi
            * (aa * aa / 2.0
                + (5.0 - t + 9.0 * cc + 4.0 * cc * cc) * aa.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * cc - 330.0 * ep2) * aa.powi(6) / 720.0));

    Coord {
        x: x + UTM_FALSE_EASTING,
        y,
    }
}

/// UTM metres to geographic degrees.
fn utm_inverse(c: Coord<f64>, zone: u8, ellipsoid: Ellipsoid) -> Coord<f64> {
    let a = SEMI_MAJOR_AXIS;
    let e2 = ellipsoid.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);
    let k0 = UTM_SCALE_FACTOR;

    let x = c.x - UTM_FALSE_EASTING;
    let m = c.y / k0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let sqrt_1_e2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = a / denom.sqrt();
    let r1 = a * (1.0 - e2) / denom.powf(1.5);
    let d = x / (n1 * k0);

    let phi = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    Coord {
        x: lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}
