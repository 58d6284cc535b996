//! `GeoJSON` export of parcel sets.

use std::io::Write as _;
use std::path::Path;

use catastro_parcel_models::Parcel;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};

use crate::GeometryError;

/// Legacy `crs` member naming an EPSG code.
fn crs_member(epsg: u32) -> JsonValue {
    serde_json::json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{epsg}") }
    })
}

fn feature(parcel: &Parcel) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("cadastral_ref".into(), parcel.cadastral_ref.clone().into());
    properties.insert("municipality".into(), parcel.municipality.clone().into());
    properties.insert(
        "municipality_code".into(),
        parcel.municipality_code.clone().into(),
    );
    properties.insert("province".into(), parcel.province.clone().into());
    properties.insert("province_code".into(), parcel.province_code.clone().into());
    properties.insert("area_m2".into(), parcel.area_m2.into());
    properties.insert(
        "land_use".into(),
        parcel
            .land_use
            .clone()
            .map_or(JsonValue::Null, JsonValue::String),
    );
    properties.insert(
        "ingested_at".into(),
        parcel.ingested_at.to_rfc3339().into(),
    );

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(&parcel.geometry))),
        id: Some(geojson::feature::Id::String(parcel.cadastral_ref.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Builds a `FeatureCollection` of `parcels`, all expressed in `epsg`.
#[must_use]
pub fn feature_collection(parcels: &[Parcel], epsg: u32) -> FeatureCollection {
    let mut foreign_members = JsonObject::new();
    foreign_members.insert("crs".into(), crs_member(epsg));

    FeatureCollection {
        bbox: None,
        features: parcels.iter().map(feature).collect(),
        foreign_members: Some(foreign_members),
    }
}

/// Writes `parcels` as a self-contained `GeoJSON` file at `path`, creating
/// the parent directory if needed.
///
/// # Errors
///
/// Returns [`GeometryError::Io`] if the file cannot be written, or
/// [`GeometryError::Json`] if serialization fails.
pub fn write_geojson(path: &Path, parcels: &[Parcel], epsg: u32) -> Result<(), GeometryError> {
    let io_error = |source: std::io::Error| GeometryError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let file = std::fs::File::create(path).map_err(io_error)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, &feature_collection(parcels, epsg))?;
    writer.flush().map_err(io_error)?;

    log::info!("Exported {} parcels to {}", parcels.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geo::{MultiPolygon, polygon};

    fn parcel(cadastral_ref: &str) -> Parcel {
        Parcel {
            cadastral_ref: cadastral_ref.to_string(),
            municipality: "ALARO".to_string(),
            municipality_code: "07001".to_string(),
            province: "Illes Balears".to_string(),
            province_code: "07".to_string(),
            geometry: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]]),
            srid: 25830,
            area_m2: 0.5,
            land_use: None,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn writes_feature_collection_with_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export").join("ALARO_catastro_parcels.geojson");

        write_geojson(&path, &[parcel("07001A00100001"), parcel("07001A00100002")], 25830)
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let collection: FeatureCollection = text.parse::<geojson::GeoJson>().unwrap().try_into().unwrap();
        assert_eq!(collection.features.len(), 2);

        let crs = &collection.foreign_members.as_ref().unwrap()["crs"];
        assert_eq!(crs["properties"]["name"], "urn:ogc:def:crs:EPSG::25830");

        let props = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(props["cadastral_ref"], "07001A00100001");
        assert_eq!(props["land_use"], JsonValue::Null);
    }
}
