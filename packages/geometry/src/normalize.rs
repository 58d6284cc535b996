//! Turns raw GML features into [`Parcel`] records in the canonical
//! coordinate reference.

use catastro_config::GeometrySourceConfig;
use catastro_parcel_models::{Municipality, Parcel, ParcelClass, normalize_reference};
use chrono::{DateTime, Utc};
use geo::{Area as _, Coord, GeodesicArea as _, MapCoords as _, MultiPolygon};

use crate::GeometryError;
use crate::crs::{Crs, Reprojector};
use crate::gml::GmlFeature;

/// Area of `geometry` in square metres.
///
/// Projected references are measured on the plane; geographic ones on the
/// ellipsoid.
#[must_use]
pub fn area_m2(geometry: &MultiPolygon<f64>, crs: Crs) -> f64 {
    if crs.is_geographic() {
        geometry.geodesic_area_unsigned()
    } else {
        geometry.unsigned_area()
    }
}

fn swap_axes(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    geometry.map_coords(|c| Coord { x: c.y, y: c.x })
}

/// Normalizes parcel features for one municipality.
///
/// Geometry is reprojected into `canonical` first and the area is measured
/// on the reprojected outline. Features without a reference, without a
/// polygon, or in an unsupported reference are skipped and logged.
///
/// # Errors
///
/// Returns [`GeometryError::Schema`] when the dataset has features but none
/// of them carries the configured reference attribute.
pub fn normalize_features(
    features: Vec<GmlFeature>,
    municipality: &Municipality,
    config: &GeometrySourceConfig,
    canonical: Crs,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<Parcel>, GeometryError> {
    let total = features.len();
    let mut parcels = Vec::with_capacity(total);
    let mut missing_reference = 0usize;
    let mut skipped = 0usize;

    for feature in features {
        let feature_id = feature.id.as_deref().unwrap_or("<no id>");

        let Some(cadastral_ref) = feature
            .attributes
            .get(&config.reference_attribute)
            .map(|r| normalize_reference(r))
            .filter(|r| !r.is_empty())
        else {
            log::warn!(
                "{}: feature {feature_id} has no {}, skipping",
                municipality.name,
                config.reference_attribute
            );
            missing_reference += 1;
            continue;
        };

        let Some(geometry) = feature.geometry else {
            log::warn!(
                "{}: parcel {cadastral_ref} has no polygon geometry, skipping",
                municipality.name
            );
            skipped += 1;
            continue;
        };

        let source = match feature.srs {
            Some(srs) => {
                let Some(crs) = Crs::from_epsg(srs.epsg) else {
                    log::warn!(
                        "{}: parcel {cadastral_ref} uses unsupported EPSG:{}, skipping",
                        municipality.name,
                        srs.epsg
                    );
                    skipped += 1;
                    continue;
                };
                let geometry = if srs.lat_lon_order {
                    swap_axes(&geometry)
                } else {
                    geometry
                };
                (crs, geometry)
            }
            None => {
                log::debug!(
                    "{}: parcel {cadastral_ref} declares no reference, assuming EPSG:{}",
                    municipality.name,
                    canonical.epsg()
                );
                (canonical, geometry)
            }
        };

        let (source_crs, geometry) = source;
        let geometry = Reprojector::new(source_crs, canonical).transform(&geometry);
        let area_m2 = area_m2(&geometry, canonical);

        let land_use = feature
            .attributes
            .get(&config.land_use_attribute)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ParcelClass::from_reference(&cadastral_ref).to_string());

        parcels.push(Parcel {
            cadastral_ref,
            municipality: municipality.name.clone(),
            municipality_code: municipality.code.clone(),
            province: municipality.province_name.clone(),
            province_code: municipality.province_code.clone(),
            geometry,
            srid: canonical.epsg(),
            area_m2,
            land_use: Some(land_use),
            ingested_at,
        });
    }

    if total > 0 && missing_reference == total {
        return Err(GeometryError::Schema {
            message: format!(
                "none of the {total} features of {} carries {}",
                municipality.name, config.reference_attribute
            ),
        });
    }

    log::info!(
        "{}: normalized {} of {total} features ({} without reference, {skipped} unusable)",
        municipality.name,
        parcels.len(),
        missing_reference
    );

    Ok(parcels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gml::read_features;
    use crate::test_fixtures::ALARO_GML;

    fn alaro() -> Municipality {
        Municipality {
            name: "ALARO".to_string(),
            code: "07001".to_string(),
            province_name: "Illes Balears".to_string(),
            province_code: "07".to_string(),
        }
    }

    fn canonical() -> Crs {
        Crs::from_epsg(25830).unwrap()
    }

    fn normalize(gml: &str) -> Result<Vec<Parcel>, GeometryError> {
        normalize_features(
            read_features(gml.as_bytes(), "inline").unwrap(),
            &alaro(),
            &GeometrySourceConfig::default(),
            canonical(),
            Utc::now(),
        )
    }

    #[test]
    fn attaches_constants_and_skips_unreferenced_features() {
        let parcels = normalize(ALARO_GML).unwrap();
        let refs: Vec<&str> = parcels.iter().map(|p| p.cadastral_ref.as_str()).collect();
        assert_eq!(refs, vec!["07001A00100001", "07001A00100002", "07001A00100003"]);

        for parcel in &parcels {
            assert_eq!(parcel.municipality, "ALARO");
            assert_eq!(parcel.municipality_code, "07001");
            assert_eq!(parcel.province, "Illes Balears");
            assert_eq!(parcel.province_code, "07");
            assert_eq!(parcel.srid, 25830);
        }
    }

    #[test]
    fn area_is_measured_after_reprojection() {
        let parcels = normalize(ALARO_GML).unwrap();
        let first = &parcels[0];

        // 100 m square in zone 31 grows by the zone 30 scale factor.
        assert!((first.area_m2 - first.geometry.unsigned_area()).abs() < 1e-9);
        assert!(first.area_m2 > 10_040.0 && first.area_m2 < 10_080.0, "{}", first.area_m2);

        // Coordinates moved into zone 30's easting range.
        let x = first.geometry.0[0].exterior().0[0].x;
        assert!(x > 980_000.0, "{x}");
    }

    #[test]
    fn land_use_prefers_attribute_then_class() {
        let parcels = normalize(ALARO_GML).unwrap();
        assert_eq!(parcels[0].land_use.as_deref(), Some("RU"));
        assert_eq!(parcels[2].land_use.as_deref(), Some("1_residential"));
    }

    #[test]
    fn geometry_already_canonical_is_untouched() {
        let gml = ALARO_GML.replace("EPSG/0/25831", "EPSG/0/25830");
        let parcels = normalize(&gml).unwrap();
        assert!((parcels[0].area_m2 - 10_000.0).abs() < 1e-6);
        assert!((parcels[0].geometry.0[0].exterior().0[0].x - 470_000.0).abs() < 1e-9);
    }

    #[test]
    fn geographic_lat_lon_input_is_swapped_and_projected() {
        let gml = r#"<FeatureCollection>
          <CadastralParcel id="p1">
            <nationalCadastralReference>07001A00100009</nationalCadastralReference>
            <geometry>
              <Polygon srsName="urn:ogc:def:crs:EPSG::4258">
                <exterior><LinearRing>
                  <posList>39.70 2.79 39.70 2.80 39.71 2.80 39.71 2.79 39.70 2.79</posList>
                </LinearRing></exterior>
              </Polygon>
            </geometry>
          </CadastralParcel>
        </FeatureCollection>"#;
        let parcels = normalize(gml).unwrap();
        let c = parcels[0].geometry.0[0].exterior().0[0];
        // Longitude 2.79 lands east of zone 30's central meridian.
        assert!(c.x > 900_000.0 && c.y > 4_390_000.0, "{c:?}");
        assert!(parcels[0].area_m2 > 900_000.0);
    }

    #[test]
    fn dataset_without_any_reference_is_a_schema_failure() {
        let gml = ALARO_GML.replace("nationalCadastralReference", "otherReference");
        let err = normalize(&gml).unwrap_err();
        assert!(matches!(err, GeometryError::Schema { .. }));
    }

    #[test]
    fn empty_dataset_is_empty() {
        let parcels = normalize("<FeatureCollection/>").unwrap();
        assert!(parcels.is_empty());
    }
}
