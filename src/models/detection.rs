use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pixel box as reported by the detector. Corners are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BoundingBox {
    #[serde(deserialize_with = "coordinate")]
    pub xmin: i32,
    #[serde(deserialize_with = "coordinate")]
    pub ymin: i32,
    #[serde(deserialize_with = "coordinate")]
    pub xmax: i32,
    #[serde(deserialize_with = "coordinate")]
    pub ymax: i32,
}

impl BoundingBox {
    pub fn is_well_formed(&self) -> bool {
        self.xmin >= 0 && self.ymin >= 0 && self.xmin < self.xmax && self.ymin < self.ymax
    }
}

/// One detection, tagged with the per-image index the detector assigned to it.
///
/// On the wire a detection is an object with a single stringified index as its key:
/// `{"3": {"xmin": 10, "ymin": 12, "xmax": 40, "ymax": 44}}`. Stored results use the
/// same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub index: u32,
    pub bbox: BoundingBox,
}

impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.index.to_string(), &self.bbox)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Detection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DetectionVisitor;

        impl<'de> Visitor<'de> for DetectionVisitor {
            type Value = Detection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object with a single index key")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Detection, A::Error> {
                let (key, bbox): (String, BoundingBox) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::custom("detection entry is empty"))?;

                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("detection entry has more than one key"));
                }

                let index = key
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| de::Error::custom(format!("detection key {key:?} is not an index")))?;

                Ok(Detection { index, bbox })
            }
        }

        deserializer.deserialize_map(DetectionVisitor)
    }
}

// Detectors send either integers or floats; floats truncate toward zero.
fn coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coordinate {
        Int(i64),
        Float(f64),
    }

    let value = match Coordinate::deserialize(deserializer)
        .map_err(|_| de::Error::custom("coordinate is not numeric"))?
    {
        Coordinate::Int(v) => v,
        Coordinate::Float(v) if v.is_finite() => v.trunc() as i64,
        Coordinate::Float(_) => return Err(de::Error::custom("coordinate is not finite")),
    };

    i32::try_from(value).map_err(|_| de::Error::custom("coordinate out of range"))
}
