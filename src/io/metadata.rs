//! Acquisition metadata: mean sun/view angles from granule metadata XML
//! (`Tile_Angles` block of the Sentinel-2 tile metadata and compatible
//! sidecar files). Missing angles fall back to the processor defaults.

use std::path::Path;

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::types::{ObservationGeometry, RetrievalError, RetrievalResult};

/// Default angles used when the metadata omits them: sun at 45/180,
/// sensor at nadir looking along 180.
const DEFAULT_SUN_ZENITH: f64 = 45.0;
const DEFAULT_SUN_AZIMUTH: f64 = 180.0;
const DEFAULT_VIEW_ZENITH: f64 = 0.0;
const DEFAULT_VIEW_AZIMUTH: f64 = 180.0;

#[derive(Debug, Deserialize)]
struct TileAngles {
    #[serde(rename = "Mean_Sun_Angle")]
    mean_sun_angle: Option<MeanAngle>,
    #[serde(rename = "Mean_Viewing_Incidence_Angle_List")]
    viewing_list: Option<ViewingList>,
}

#[derive(Debug, Deserialize)]
struct MeanAngle {
    #[serde(rename = "ZENITH_ANGLE")]
    zenith: AngleValue,
    #[serde(rename = "AZIMUTH_ANGLE")]
    azimuth: AngleValue,
}

#[derive(Debug, Deserialize)]
struct AngleValue {
    #[serde(rename = "@unit")]
    #[allow(dead_code)]
    unit: Option<String>,
    #[serde(rename = "$text")]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ViewingList {
    #[serde(rename = "Mean_Viewing_Incidence_Angle", default)]
    angles: Vec<ViewingAngle>,
}

#[derive(Debug, Deserialize)]
struct ViewingAngle {
    #[serde(rename = "@bandId")]
    #[allow(dead_code)]
    band_id: Option<String>,
    #[serde(rename = "ZENITH_ANGLE")]
    zenith: AngleValue,
    #[serde(rename = "AZIMUTH_ANGLE")]
    azimuth: AngleValue,
}

/// Parser for tile metadata XML.
pub struct AngleParser;

impl AngleParser {
    /// Parse the `Tile_Angles` block out of a (possibly larger) metadata
    /// document and reduce it to an observation geometry.
    pub fn parse(xml_content: &str) -> RetrievalResult<ObservationGeometry> {
        let block = extract_tile_angles(xml_content)?;
        let angles: TileAngles = from_str(block).map_err(|e| {
            RetrievalError::XmlParsing(format!("failed to parse Tile_Angles: {}", e))
        })?;

        let (sun_zenith, sun_azimuth) = match &angles.mean_sun_angle {
            Some(sun) => (sun.zenith.value, sun.azimuth.value),
            None => {
                log::warn!("metadata lacks Mean_Sun_Angle, using defaults");
                (DEFAULT_SUN_ZENITH, DEFAULT_SUN_AZIMUTH)
            }
        };

        // per-band mean viewing angles are averaged into one scene geometry
        let (view_zenith, view_azimuth) = match &angles.viewing_list {
            Some(list) if !list.angles.is_empty() => {
                let n = list.angles.len() as f64;
                (
                    list.angles.iter().map(|a| a.zenith.value).sum::<f64>() / n,
                    list.angles.iter().map(|a| a.azimuth.value).sum::<f64>() / n,
                )
            }
            _ => {
                log::warn!("metadata lacks viewing angles, assuming nadir");
                (DEFAULT_VIEW_ZENITH, DEFAULT_VIEW_AZIMUTH)
            }
        };

        let geometry = ObservationGeometry::new(
            sun_zenith,
            view_zenith,
            relative_azimuth(sun_azimuth, view_azimuth),
        );
        geometry.validate()?;
        log::debug!("parsed acquisition geometry: {:?}", geometry);
        Ok(geometry)
    }
}

/// Read and parse a metadata file.
pub fn read_angles_file<P: AsRef<Path>>(path: P) -> RetrievalResult<ObservationGeometry> {
    log::debug!("Reading acquisition angles from {}", path.as_ref().display());
    let content = std::fs::read_to_string(path.as_ref())?;
    AngleParser::parse(&content)
}

/// Relative azimuth folded into [0, 180].
fn relative_azimuth(sun_azimuth: f64, view_azimuth: f64) -> f64 {
    let d = (sun_azimuth - view_azimuth).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// The angle block may sit anywhere inside the tile metadata document.
fn extract_tile_angles(xml: &str) -> RetrievalResult<&str> {
    let start = xml.find("<Tile_Angles").ok_or_else(|| {
        RetrievalError::XmlParsing("no Tile_Angles element in metadata".to_string())
    })?;
    let end = xml[start..].find("</Tile_Angles>").ok_or_else(|| {
        RetrievalError::XmlParsing("unterminated Tile_Angles element".to_string())
    })?;
    Ok(&xml[start..start + end + "</Tile_Angles>".len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <Granule_Metadata>
      <Geometric_Info>
        <Tile_Angles>
          <Mean_Sun_Angle>
            <ZENITH_ANGLE unit="deg">32.5</ZENITH_ANGLE>
            <AZIMUTH_ANGLE unit="deg">154.0</AZIMUTH_ANGLE>
          </Mean_Sun_Angle>
          <Mean_Viewing_Incidence_Angle_List>
            <Mean_Viewing_Incidence_Angle bandId="0">
              <ZENITH_ANGLE unit="deg">4.0</ZENITH_ANGLE>
              <AZIMUTH_ANGLE unit="deg">100.0</AZIMUTH_ANGLE>
            </Mean_Viewing_Incidence_Angle>
            <Mean_Viewing_Incidence_Angle bandId="1">
              <ZENITH_ANGLE unit="deg">6.0</ZENITH_ANGLE>
              <AZIMUTH_ANGLE unit="deg">110.0</AZIMUTH_ANGLE>
            </Mean_Viewing_Incidence_Angle>
          </Mean_Viewing_Incidence_Angle_List>
        </Tile_Angles>
      </Geometric_Info>
    </Granule_Metadata>"#;

    #[test]
    fn test_parse_angles() {
        let geometry = AngleParser::parse(SAMPLE_XML).unwrap();
        assert_relative_eq!(geometry.sun_zenith, 32.5);
        assert_relative_eq!(geometry.view_zenith, 5.0);
        assert_relative_eq!(geometry.relative_azimuth, 49.0);
    }

    #[test]
    fn test_missing_viewing_angles_fall_back_to_nadir() {
        let xml = r#"<Tile_Angles>
          <Mean_Sun_Angle>
            <ZENITH_ANGLE unit="deg">40.0</ZENITH_ANGLE>
            <AZIMUTH_ANGLE unit="deg">180.0</AZIMUTH_ANGLE>
          </Mean_Sun_Angle>
        </Tile_Angles>"#;
        let geometry = AngleParser::parse(xml).unwrap();
        assert_relative_eq!(geometry.sun_zenith, 40.0);
        assert_relative_eq!(geometry.view_zenith, 0.0);
        assert_relative_eq!(geometry.relative_azimuth, 0.0);
    }

    #[test]
    fn test_missing_block_is_an_error() {
        assert!(matches!(
            AngleParser::parse("<Granule_Metadata/>"),
            Err(RetrievalError::XmlParsing(_))
        ));
    }
}
