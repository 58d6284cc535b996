//! GML and archive fixtures shared by the geometry tests.

use std::io::Write as _;

/// Three referenced parcels in EPSG:25831 (one with a hole) and one
/// feature missing its cadastral reference.
pub const ALARO_GML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gml:FeatureCollection xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:cp="http://inspire.ec.europa.eu/schemas/cp/4.0"
    xmlns:base="http://inspire.ec.europa.eu/schemas/base/3.3"
    gml:id="ES.SDGC.CP.07001">
  <gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.07001A00100001">
      <cp:areaValue uom="m2">10000</cp:areaValue>
      <cp:geometry>
        <gml:MultiSurface gml:id="MultiSurface_ES.SDGC.CP.07001A00100001"
            srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
          <gml:surfaceMember>
            <gml:Surface gml:id="Surface_ES.SDGC.CP.07001A00100001.1"
                srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
              <gml:patches>
                <gml:PolygonPatch>
                  <gml:exterior>
                    <gml:LinearRing>
                      <gml:posList srsDimension="2" count="5">470000 4380000 470100 4380000 470100 4380100 470000 4380100 470000 4380000</gml:posList>
                    </gml:LinearRing>
                  </gml:exterior>
                </gml:PolygonPatch>
              </gml:patches>
            </gml:Surface>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
      <cp:inspireId>
        <base:Identifier>
          <base:localId>07001A00100001</base:localId>
          <base:namespace>ES.SDGC.CP</base:namespace>
        </base:Identifier>
      </cp:inspireId>
      <cp:label>00001</cp:label>
      <cp:nationalCadastralReference>07001A00100001</cp:nationalCadastralReference>
      <cp:referencePoint>
        <gml:Point gml:id="ReferencePoint_ES.SDGC.CP.07001A00100001"
            srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
          <gml:pos>470050 4380050</gml:pos>
        </gml:Point>
      </cp:referencePoint>
    </cp:CadastralParcel>
  </gml:featureMember>
  <gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.07001A00100002">
      <cp:areaValue uom="m2">9900</cp:areaValue>
      <cp:geometry>
        <gml:MultiSurface gml:id="MultiSurface_ES.SDGC.CP.07001A00100002"
            srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
          <gml:surfaceMember>
            <gml:Surface gml:id="Surface_ES.SDGC.CP.07001A00100002.1">
              <gml:patches>
                <gml:PolygonPatch>
                  <gml:exterior>
                    <gml:LinearRing>
                      <gml:posList srsDimension="2">470200 4380000 470300 4380000 470300 4380100 470200 4380100 470200 4380000</gml:posList>
                    </gml:LinearRing>
                  </gml:exterior>
                  <gml:interior>
                    <gml:LinearRing>
                      <gml:posList srsDimension="2">470240 4380040 470240 4380050 470250 4380050 470250 4380040 470240 4380040</gml:posList>
                    </gml:LinearRing>
                  </gml:interior>
                </gml:PolygonPatch>
              </gml:patches>
            </gml:Surface>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
      <cp:nationalCadastralReference> 07001a00100002 </cp:nationalCadastralReference>
    </cp:CadastralParcel>
  </gml:featureMember>
  <gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.07001A00100003">
      <cp:areaValue uom="m2">10000</cp:areaValue>
      <cp:currentUse>1_residential</cp:currentUse>
      <cp:geometry>
        <gml:MultiSurface gml:id="MultiSurface_ES.SDGC.CP.07001A00100003"
            srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
          <gml:surfaceMember>
            <gml:Surface gml:id="Surface_ES.SDGC.CP.07001A00100003.1">
              <gml:patches>
                <gml:PolygonPatch>
                  <gml:exterior>
                    <gml:LinearRing>
                      <gml:posList srsDimension="2">470400 4380000 470500 4380000 470500 4380100 470400 4380100 470400 4380000</gml:posList>
                    </gml:LinearRing>
                  </gml:exterior>
                </gml:PolygonPatch>
              </gml:patches>
            </gml:Surface>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
      <cp:nationalCadastralReference>07001A00100003</cp:nationalCadastralReference>
    </cp:CadastralParcel>
  </gml:featureMember>
  <gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.UNKNOWN">
      <cp:geometry>
        <gml:MultiSurface gml:id="MultiSurface_ES.SDGC.CP.UNKNOWN"
            srsName="http://www.opengis.net/def/crs/EPSG/0/25831">
          <gml:surfaceMember>
            <gml:Surface gml:id="Surface_ES.SDGC.CP.UNKNOWN.1">
              <gml:patches>
                <gml:PolygonPatch>
                  <gml:exterior>
                    <gml:LinearRing>
                      <gml:posList srsDimension="2">470600 4380000 470700 4380000 470700 4380100 470600 4380000</gml:posList>
                    </gml:LinearRing>
                  </gml:exterior>
                </gml:PolygonPatch>
              </gml:patches>
            </gml:Surface>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
    </cp:CadastralParcel>
  </gml:featureMember>
</gml:FeatureCollection>
"#;

/// One `featureMember` with a single-ring parcel in EPSG:25831.
pub fn parcel_member(reference: &str, pos_list: &str) -> String {
    format!(
        r#"<gml:featureMember>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.{reference}">
      <cp:geometry>
        <gml:MultiSurface srsName="urn:ogc:def:crs:EPSG::25831">
          <gml:surfaceMember>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:posList>{pos_list}</gml:posList>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
      <cp:nationalCadastralReference>{reference}</cp:nationalCadastralReference>
    </cp:CadastralParcel>
  </gml:featureMember>"#
    )
}

/// Wraps feature members in a `FeatureCollection`.
pub fn gml_document(members: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gml:FeatureCollection xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:cp="http://inspire.ec.europa.eu/schemas/cp/4.0">
{}
</gml:FeatureCollection>
"#,
        members.join("\n")
    )
}

/// Builds an in-memory zip archive from `(name, contents)` entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// The archive the bulk source publishes for ALARO.
pub fn alaro_archive() -> Vec<u8> {
    zip_bytes(&[
        ("A.ES.SDGC.CP.07001.cadastralparcel.gml", ALARO_GML.as_bytes()),
        ("A.ES.SDGC.CP.07001.xml", b"<metadata/>"),
    ])
}
