//! Streaming reader for INSPIRE cadastral parcel GML.
//!
//! Every element whose local name is [`PARCEL_ELEMENT`] becomes one
//! [`GmlFeature`]. Text of its direct children (`nationalCadastralReference`,
//! `areaValue`, `label`, ...) is collected as attributes, and every
//! `Polygon`/`PolygonPatch` below it contributes one polygon built from the
//! `posList`, `pos` or `coordinates` of its exterior and interior rings.
//! Coordinates are returned in document order; axis swapping and
//! reprojection happen in [`crate::normalize`].

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use quick_xml::events::{BytesStart, Event};

use crate::GeometryError;
use crate::crs::{SrsName, parse_srs_name};

/// Local name of the feature elements read from the document.
pub const PARCEL_ELEMENT: &str = "CadastralParcel";

/// One parcel feature as found in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct GmlFeature {
    /// The feature's `gml:id`.
    pub id: Option<String>,
    /// Text of the feature's direct child elements, by local name.
    pub attributes: BTreeMap<String, String>,
    /// Polygon geometry, `None` if absent or malformed.
    pub geometry: Option<MultiPolygon<f64>>,
    /// Coordinate reference of the geometry, if declared.
    pub srs: Option<SrsName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingRole {
    Exterior,
    Interior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordElement {
    PosList { dimension: usize },
    Pos,
    Coordinates,
}

#[derive(Debug, Default)]
struct FeatureBuilder {
    id: Option<String>,
    attributes: BTreeMap<String, String>,
    srs: Option<SrsName>,
    polygons: Vec<Polygon<f64>>,
    depth: usize,
    child: Option<String>,
    ring_role: Option<RingRole>,
    coord_element: Option<CoordElement>,
    ring: Vec<Coord<f64>>,
    exterior: Option<LineString<f64>>,
    interiors: Vec<LineString<f64>>,
    invalid: Option<String>,
}

impl FeatureBuilder {
    fn start(&mut self, name: &str, e: &BytesStart<'_>) {
        self.depth += 1;
        if self.depth == 1 {
            self.child = Some(name.to_string());
        }
        if self.srs.is_none() {
            self.srs = attribute(e, "srsName").as_deref().and_then(parse_srs_name);
        }

        match name {
            "exterior" | "outerBoundaryIs" => self.ring_role = Some(RingRole::Exterior),
            "interior" | "innerBoundaryIs" => self.ring_role = Some(RingRole::Interior),
            "Polygon" | "PolygonPatch" => {
                self.exterior = None;
                self.interiors.clear();
            }
            "LinearRing" => self.ring.clear(),
            "posList" if self.ring_role.is_some() => {
                let dimension = attribute(e, "srsDimension")
                    .and_then(|d| d.trim().parse().ok())
                    .filter(|d| *d >= 2)
                    .unwrap_or(2);
                self.coord_element = Some(CoordElement::PosList { dimension });
            }
            "pos" if self.ring_role.is_some() => self.coord_element = Some(CoordElement::Pos),
            "coordinates" if self.ring_role.is_some() => {
                self.coord_element = Some(CoordElement::Coordinates);
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &str) {
        match name {
            "posList" | "pos" | "coordinates" => self.coord_element = None,
            "LinearRing" => {
                let ring = LineString::from(std::mem::take(&mut self.ring));
                match self.ring_role {
                    Some(RingRole::Exterior) => self.exterior = Some(ring),
                    Some(RingRole::Interior) => self.interiors.push(ring),
                    None => {}
                }
            }
            "exterior" | "outerBoundaryIs" | "interior" | "innerBoundaryIs" => {
                self.ring_role = None;
            }
            "Polygon" | "PolygonPatch" => {
                if let Some(exterior) = self.exterior.take() {
                    self.polygons
                        .push(Polygon::new(exterior, std::mem::take(&mut self.interiors)));
                }
            }
            _ => {}
        }

        if self.depth == 1 {
            self.child = None;
        }
        self.depth = self.depth.saturating_sub(1);
    }

    fn text(&mut self, text: &str) {
        if let Some(element) = self.coord_element {
            if let Err(message) = parse_coordinates(element, text, &mut self.ring) {
                self.invalid.get_or_insert(message);
            }
            return;
        }

        if self.depth == 1
            && let Some(child) = &self.child
        {
            self.attributes
                .entry(child.clone())
                .and_modify(|existing| existing.push_str(text))
                .or_insert_with(|| text.to_string());
        }
    }

    fn finish(self, document_srs: Option<SrsName>) -> GmlFeature {
        let geometry = match self.invalid {
            Some(message) => {
                log::warn!(
                    "Discarding malformed geometry of {}: {message}",
                    self.id.as_deref().unwrap_or("<no id>")
                );
                None
            }
            None if self.polygons.is_empty() => None,
            None => Some(MultiPolygon(self.polygons)),
        };

        GmlFeature {
            id: self.id,
            attributes: self.attributes,
            geometry,
            srs: self.srs.or(document_srs),
        }
    }
}

fn parse_number(token: &str) -> Result<f64, String> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad coordinate {token:?}: {e}"))
}

fn parse_coordinates(
    element: CoordElement,
    text: &str,
    ring: &mut Vec<Coord<f64>>,
) -> Result<(), String> {
    match element {
        CoordElement::PosList { dimension } => {
            let values = text
                .split_whitespace()
                .map(parse_number)
                .collect::<Result<Vec<_>, _>>()?;
            if values.len() % dimension != 0 {
                return Err(format!(
                    "posList has {} values, not a multiple of {dimension}",
                    values.len()
                ));
            }
            ring.extend(
                values
                    .chunks_exact(dimension)
                    .map(|c| Coord { x: c[0], y: c[1] }),
            );
        }
        CoordElement::Pos => {
            let values = text
                .split_whitespace()
                .map(parse_number)
                .collect::<Result<Vec<_>, _>>()?;
            if values.len() < 2 {
                return Err(format!("pos has {} values", values.len()));
            }
            ring.push(Coord {
                x: values[0],
                y: values[1],
            });
        }
        CoordElement::Coordinates => {
            for tuple in text.split_whitespace() {
                let mut parts = tuple.split(',');
                let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
                    return Err(format!("bad coordinate tuple {tuple:?}"));
                };
                ring.push(Coord {
                    x: parse_number(x)?,
                    y: parse_number(y)?,
                });
            }
        }
    }
    Ok(())
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(std::borrow::Cow::into_owned))
}

fn malformed(label: &str, e: &quick_xml::Error) -> GeometryError {
    GeometryError::Extraction {
        path: label.to_string(),
        message: format!("malformed GML: {e}"),
    }
}

/// Reads every parcel feature from a GML document.
///
/// `label` names the source in errors.
///
/// # Errors
///
/// Returns [`GeometryError::Extraction`] if the document is not well-formed
/// XML. Malformed coordinates only invalidate the affected feature's
/// geometry.
pub fn read_features<R: BufRead>(source: R, label: &str) -> Result<Vec<GmlFeature>, GeometryError> {
    let mut reader = quick_xml::Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut features = Vec::new();
    let mut current: Option<FeatureBuilder> = None;
    let mut document_srs: Option<SrsName> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                match current.as_mut() {
                    Some(builder) => builder.start(&name, e),
                    None if name == PARCEL_ELEMENT => {
                        current = Some(FeatureBuilder {
                            id: attribute(e, "id"),
                            srs: attribute(e, "srsName").as_deref().and_then(parse_srs_name),
                            ..FeatureBuilder::default()
                        });
                    }
                    None => {
                        if document_srs.is_none() {
                            document_srs =
                                attribute(e, "srsName").as_deref().and_then(parse_srs_name);
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = local_name(e);
                match current.as_mut() {
                    Some(builder) => {
                        builder.start(&name, e);
                        builder.end(&name);
                    }
                    None if name == PARCEL_ELEMENT => {
                        let builder = FeatureBuilder {
                            id: attribute(e, "id"),
                            ..FeatureBuilder::default()
                        };
                        features.push(builder.finish(document_srs));
                    }
                    None => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if let Some(mut builder) = current.take() {
                    if builder.depth == 0 {
                        features.push(builder.finish(document_srs));
                    } else {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        builder.end(&name);
                        current = Some(builder);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(builder) = current.as_mut() {
                    let text = e.unescape().map_err(|e| malformed(label, &e))?;
                    builder.text(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(builder) = current.as_mut() {
                    builder.text(&String::from_utf8_lossy(&e[..]));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(label, &e)),
            _ => {}
        }
        buf.clear();
    }

    if current.is_some() {
        return Err(GeometryError::Extraction {
            path: label.to_string(),
            message: format!("document ended inside a {PARCEL_ELEMENT} element"),
        });
    }

    Ok(features)
}

/// Reads every parcel feature from a GML file.
///
/// # Errors
///
/// Returns [`GeometryError::Io`] if the file cannot be opened, or any
/// error from [`read_features`].
pub fn read_features_from_path(path: &Path) -> Result<Vec<GmlFeature>, GeometryError> {
    let file = std::fs::File::open(path).map_err(|e| GeometryError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    read_features(
        std::io::BufReader::new(file),
        &path.display().to_string(),
    )
}
