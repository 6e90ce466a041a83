//! Tiled JSON map subset: a `land` object layer with terrain rectangles and
//! polygons, and an `items` object layer with the `player` spawn and the
//! `finish` region. Everything is converted to y-up map pixels.

use bevy::prelude::*;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

pub const LAND_LAYER: &str = "land";
pub const ITEMS_LAYER: &str = "items";
pub const SPAWN_OBJECT: &str = "player";
pub const FINISH_OBJECT: &str = "finish";

#[derive(Debug, Clone, PartialEq)]
pub enum MapShape {
    Rectangle(Rect),
    Polygon(Vec<Vec2>),
}

#[derive(Debug, Clone)]
pub struct LevelMap {
    pub width_px: f32,
    pub height_px: f32,
    pub land: Vec<MapShape>,
    pub spawn: Vec2,
    pub finish: Rect,
    pub decor_layers: Vec<String>,
}

impl LevelMap {
    pub fn load(path: &Path) -> Result<Self, LevelMapError> {
        let raw = fs::read_to_string(path).map_err(|source| LevelMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw).map_err(|error| match error {
            LevelMapError::Parse { source, .. } => LevelMapError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, LevelMapError> {
        let file: TiledMapFile = serde_json::from_str(raw).map_err(|source| {
            LevelMapError::Parse {
                path: PathBuf::new(),
                source,
            }
        })?;
        Self::from_tiled(file)
    }

    pub fn size_px(&self) -> Vec2 {
        Vec2::new(self.width_px, self.height_px)
    }

    fn from_tiled(file: TiledMapFile) -> Result<Self, LevelMapError> {
        let width_px = (file.width * file.tilewidth) as f32;
        let height_px = (file.height * file.tileheight) as f32;

        let land_layer = file
            .layers
            .iter()
            .find(|layer| layer.name == LAND_LAYER)
            .ok_or(LevelMapError::MissingLayer(LAND_LAYER))?;
        let items_layer = file
            .layers
            .iter()
            .find(|layer| layer.name == ITEMS_LAYER)
            .ok_or(LevelMapError::MissingLayer(ITEMS_LAYER))?;

        let mut land = Vec::with_capacity(land_layer.objects.len());
        for object in &land_layer.objects {
            if object.ellipse || object.point {
                continue;
            }
            if let Some(points) = &object.polygon {
                if points.len() < 3 {
                    return Err(LevelMapError::InvalidShape {
                        object_id: object.id,
                        reason: format!("polygon has {} vertices", points.len()),
                    });
                }
                land.push(MapShape::Polygon(
                    points
                        .iter()
                        .map(|point| {
                            Vec2::new(object.x + point.x, height_px - (object.y + point.y))
                        })
                        .collect(),
                ));
            } else {
                if object.width <= 0.0 || object.height <= 0.0 {
                    return Err(LevelMapError::InvalidShape {
                        object_id: object.id,
                        reason: "rectangle has no area".to_string(),
                    });
                }
                land.push(MapShape::Rectangle(object.rect_y_up(height_px)));
            }
        }

        let spawn = items_layer
            .objects
            .iter()
            .find(|object| object.name == SPAWN_OBJECT)
            .map(|object| object.rect_y_up(height_px).min)
            .ok_or(LevelMapError::MissingSpawn)?;
        let finish = items_layer
            .objects
            .iter()
            .find(|object| object.name == FINISH_OBJECT)
            .map(|object| object.rect_y_up(height_px))
            .ok_or(LevelMapError::MissingFinish)?;

        let decor_layers = file
            .layers
            .iter()
            .filter(|layer| layer.name != LAND_LAYER && layer.name != ITEMS_LAYER)
            .map(|layer| layer.name.clone())
            .collect();

        Ok(Self {
            width_px,
            height_px,
            land,
            spawn,
            finish,
            decor_layers,
        })
    }
}

#[derive(Debug)]
pub enum LevelMapError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    MissingLayer(&'static str),
    MissingSpawn,
    MissingFinish,
    InvalidShape {
        object_id: u32,
        reason: String,
    },
}

impl Display for LevelMapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read map `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse map `{}`: {source}", path.display())
            }
            Self::MissingLayer(name) => write!(f, "map has no `{name}` object layer"),
            Self::MissingSpawn => {
                write!(f, "map `{ITEMS_LAYER}` layer has no `{SPAWN_OBJECT}` object")
            }
            Self::MissingFinish => {
                write!(f, "map `{ITEMS_LAYER}` layer has no `{FINISH_OBJECT}` object")
            }
            Self::InvalidShape { object_id, reason } => {
                write!(f, "land object {object_id} is invalid: {reason}")
            }
        }
    }
}

impl Error for LevelMapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TiledMapFile {
    width: u32,
    height: u32,
    tilewidth: u32,
    tileheight: u32,
    #[serde(default)]
    layers: Vec<TiledLayerFile>,
}

#[derive(Debug, Deserialize)]
struct TiledLayerFile {
    name: String,
    #[serde(default)]
    objects: Vec<TiledObjectFile>,
}

#[derive(Debug, Deserialize)]
struct TiledObjectFile {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    name: String,
    x: f32,
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    polygon: Option<Vec<TiledPoint>>,
    #[serde(default)]
    ellipse: bool,
    #[serde(default)]
    point: bool,
}

impl TiledObjectFile {
    fn rect_y_up(&self, map_height_px: f32) -> Rect {
        let bottom = map_height_px - (self.y + self.height);
        Rect::new(self.x, bottom, self.x + self.width, bottom + self.height)
    }
}

#[derive(Debug, Deserialize)]
struct TiledPoint {
    x: f32,
    y: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAP: &str = r#"{
        "width": 50, "height": 20, "tilewidth": 32, "tileheight": 32,
        "layers": [
            { "name": "background", "type": "tilelayer", "data": [] },
            { "name": "land", "type": "objectgroup", "objects": [
                { "id": 1, "x": 0, "y": 560, "width": 400, "height": 80 },
                { "id": 2, "x": 400, "y": 640, "polygon": [
                    { "x": 0, "y": 0 }, { "x": 300, "y": -120 }, { "x": 600, "y": 0 }
                ] },
                { "id": 3, "x": 10, "y": 10, "width": 5, "height": 5, "ellipse": true }
            ] },
            { "name": "items", "type": "objectgroup", "objects": [
                { "id": 4, "name": "player", "x": 96, "y": 400, "width": 32, "height": 32 },
                { "id": 5, "name": "finish", "x": 1400, "y": 300, "width": 100, "height": 260 }
            ] }
        ]
    }"#;

    #[test]
    fn parses_layers_and_flips_to_y_up() {
        let map = LevelMap::from_json_str(SAMPLE_MAP).expect("sample map should parse");

        assert_eq!(map.size_px(), Vec2::new(1600.0, 640.0));
        assert_eq!(map.land.len(), 2);
        assert_eq!(
            map.land[0],
            MapShape::Rectangle(Rect::new(0.0, 0.0, 400.0, 80.0))
        );
        let MapShape::Polygon(points) = &map.land[1] else {
            panic!("second land object should be a polygon");
        };
        assert_eq!(points[1], Vec2::new(700.0, 120.0));
        assert_eq!(map.spawn, Vec2::new(96.0, 208.0));
        assert_eq!(map.finish.center(), Vec2::new(1450.0, 210.0));
        assert_eq!(map.decor_layers, vec!["background".to_string()]);
    }

    #[test]
    fn missing_finish_is_a_content_error() {
        let without_finish = SAMPLE_MAP.replace("\"finish\"", "\"flag\"");

        let error = LevelMap::from_json_str(&without_finish).expect_err("finish is required");
        assert!(matches!(error, LevelMapError::MissingFinish));
    }

    #[test]
    fn missing_spawn_is_a_content_error() {
        let without_spawn = SAMPLE_MAP.replace("\"player\"", "\"npc\"");

        let error = LevelMap::from_json_str(&without_spawn).expect_err("spawn is required");
        assert!(matches!(error, LevelMapError::MissingSpawn));
    }

    #[test]
    fn missing_land_layer_is_a_content_error() {
        let without_land = SAMPLE_MAP.replace("\"land\"", "\"ground\"");

        let error = LevelMap::from_json_str(&without_land).expect_err("land layer is required");
        assert!(matches!(error, LevelMapError::MissingLayer(LAND_LAYER)));
    }

    #[test]
    fn shipped_maps_load() {
        let maps_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/maps");
        for id in 1..=16 {
            let path = maps_dir.join(format!("level{id}.json"));
            let map = LevelMap::load(&path)
                .unwrap_or_else(|error| panic!("level {id} should load: {error}"));
            assert!(!map.land.is_empty());
            assert!(map.finish.min.x > map.spawn.x);
        }
    }
}
