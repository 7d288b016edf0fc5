//! GeoJSON boundary features as returned by a WFS `GetFeature` request

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::MosaicistError;

/// A GeoJSON feature collection.
#[derive(Debug, Default, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// A GeoJSON feature.
#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A GeoJSON geometry, decoded lazily by type.
#[derive(Debug, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

/// A named region boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct Boundary {
    pub label: String,
    pub shape: MultiPolygon<f64>,
}

type Ring = Vec<Vec<f64>>;

impl Feature {
    /// Region label: the `label_field` property if set, otherwise the feature id.
    pub fn label(&self, label_field: &str) -> Option<String> {
        let value = self.properties.get(label_field).or(self.id.as_ref())?;
        match value {
            Value::String(label) => Some(label.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Polygonal geometry of the feature. Returns `None` for other geometry types.
    pub fn shape(&self) -> Result<Option<MultiPolygon<f64>>, MosaicistError> {
        let geometry = match &self.geometry {
            Some(geometry) => geometry,
            None => return Ok(None),
        };
        let polygons = match geometry.kind.as_str() {
            "Polygon" => {
                let rings: Vec<Ring> = serde_json::from_value(geometry.coordinates.clone())?;
                vec![polygon(rings)]
            }
            "MultiPolygon" => {
                let polygons: Vec<Vec<Ring>> =
                    serde_json::from_value(geometry.coordinates.clone())?;
                polygons.into_iter().map(polygon).collect()
            }
            _ => return Ok(None),
        };
        Ok(Some(MultiPolygon::new(polygons)))
    }
}

fn ring(positions: Ring) -> LineString<f64> {
    positions
        .into_iter()
        .filter(|position| position.len() >= 2)
        .map(|position| Coord {
            x: position[0],
            y: position[1],
        })
        .collect()
}

fn polygon(rings: Vec<Ring>) -> Polygon<f64> {
    let mut rings = rings.into_iter().map(ring);
    let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
    Polygon::new(exterior, rings.collect())
}

impl FeatureCollection {
    /// Labelled polygonal boundaries.
    ///
    /// Features without a label or without polygonal geometry are skipped.
    pub fn boundaries(&self, label_field: &str) -> Result<Vec<Boundary>, MosaicistError> {
        let mut boundaries = vec![];
        for (index, feature) in self.features.iter().enumerate() {
            match (feature.label(label_field), feature.shape()?) {
                (Some(label), Some(shape)) => {
                    match boundaries
                        .iter_mut()
                        .find(|boundary: &&mut Boundary| boundary.label == label)
                    {
                        // Regions split over several features are summarised as one.
                        Some(boundary) => {
                            tracing::warn!(index, %label, "merging features with a repeated label");
                            boundary.shape.0.extend(shape.0);
                        }
                        None => boundaries.push(Boundary { label, shape }),
                    }
                }
                _ => tracing::warn!(index, "skipping feature without label or polygon"),
            }
        }
        Ok(boundaries)
    }
}
