use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(PreStartup, load_game_config)
            .add_systems(Update, reload_game_config_hotkey);
    }
}

fn load_game_config(mut commands: Commands) {
    let config = GameConfig::load_from_dir(Path::new(CONFIG_DIR)).unwrap_or_else(|error| {
        panic!("failed to load configuration from `{CONFIG_DIR}`: {error}");
    });

    log_config_summary("Loaded", &config);
    info!("Press F5 to hot-reload config files from `{CONFIG_DIR}`.");

    commands.insert_resource(config);
}

fn reload_game_config_hotkey(
    keyboard: Res<ButtonInput<KeyCode>>,
    game_config: Option<ResMut<GameConfig>>,
) {
    if !keyboard.just_pressed(KeyCode::F5) {
        return;
    }

    let Some(mut current_config) = game_config else {
        warn!("Config hot-reload requested, but `GameConfig` resource is not initialized yet.");
        return;
    };

    match GameConfig::load_from_dir(Path::new(CONFIG_DIR)) {
        Ok(new_config) => {
            *current_config = new_config;
            log_config_summary("Hot-reloaded", &current_config);
        }
        Err(error) => {
            error!("Config hot-reload failed; keeping previous config: {error}");
        }
    }
}

fn log_config_summary(prefix: &str, config: &GameConfig) {
    info!(
        "{prefix} config: {} levels, {} gameplay tracks, {} sprites, {} audio clips, world scale {}.",
        config.levels.levels.len(),
        config.levels.music.gameplay.len(),
        config.sprite_assets_by_id.len(),
        config.audio_assets_by_id.len(),
        config.game.physics.world_scale
    );
}

#[derive(Resource, Debug, Clone)]
pub struct GameConfig {
    pub game: GameFile,
    pub vehicle: VehicleFile,
    pub levels: LevelsFile,
    pub assets: AssetsFile,
    pub sprite_assets_by_id: HashMap<String, SpriteAssetConfig>,
    pub audio_assets_by_id: HashMap<String, AudioAssetConfig>,
}

impl GameConfig {
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let game: GameFile = read_toml(&config_dir.join("game.toml"))?;
        let vehicle: VehicleFile = read_toml(&config_dir.join("vehicle.toml"))?;
        let levels: LevelsFile = read_toml(&config_dir.join("levels.toml"))?;
        let assets: AssetsFile = read_toml(&config_dir.join("assets.toml"))?;

        let config = Self {
            sprite_assets_by_id: to_index("assets.toml::sprites", &assets.sprites)?,
            audio_assets_by_id: to_index("assets.toml::audio", &assets.audio)?,
            game,
            vehicle,
            levels,
            assets,
        };

        config.validate_references()?;
        Ok(config)
    }

    pub fn level(&self, id: u32) -> Option<&LevelConfig> {
        self.levels.levels.iter().find(|level| level.id == id)
    }

    pub fn level_count(&self) -> u32 {
        self.game.app.level_count
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        let app = &self.game.app;
        if app.level_count == 0 {
            return Err(ConfigError::Validation(
                "game.toml::app.level_count must be > 0".to_string(),
            ));
        }
        if self.levels.levels.len() != app.level_count as usize {
            return Err(ConfigError::Validation(format!(
                "levels.toml::levels has {} rows but game.toml::app.level_count is {}",
                self.levels.levels.len(),
                app.level_count
            )));
        }
        for expected_id in 1..=app.level_count {
            let Some(level) = self.level(expected_id) else {
                return Err(ConfigError::Validation(format!(
                    "levels.toml::levels is missing level id {expected_id}"
                )));
            };
            if level.map.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "levels.toml::levels id {expected_id} has an empty map path"
                )));
            }
        }

        let physics = &self.game.physics;
        if physics.world_scale <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::physics.world_scale must be > 0".to_string(),
            ));
        }
        if physics.max_step_seconds <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::physics.max_step_seconds must be > 0".to_string(),
            ));
        }
        if physics.settle_step_seconds <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::physics.settle_step_seconds must be > 0".to_string(),
            ));
        }
        if let Some(margin) = physics.far_edge_freeze_margin_px {
            if margin < 0.0 {
                return Err(ConfigError::Validation(
                    "game.toml::physics.far_edge_freeze_margin_px must be >= 0".to_string(),
                ));
            }
        }

        let rules = &self.game.level;
        if rules.upside_down_timeout_seconds <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::level.upside_down_timeout_seconds must be > 0".to_string(),
            ));
        }
        if rules.loading_delay_seconds < 0.0 || rules.resume_delay_seconds < 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::level delays must be >= 0".to_string(),
            ));
        }
        if !(0.0..=360.0).contains(&rules.inverted_min_degrees)
            || !(0.0..=360.0).contains(&rules.inverted_max_degrees)
            || rules.inverted_min_degrees >= rules.inverted_max_degrees
        {
            return Err(ConfigError::Validation(format!(
                "game.toml::level inverted band [{}, {}] must satisfy 0 <= min < max <= 360",
                rules.inverted_min_degrees, rules.inverted_max_degrees
            )));
        }

        let terrain = &self.game.terrain;
        if terrain.density <= 0.0 || terrain.boundary_wall_width_px <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::terrain.density and boundary_wall_width_px must be > 0".to_string(),
            ));
        }

        let chassis = &self.vehicle.chassis;
        if !self.sprite_assets_by_id.contains_key(&chassis.sprite_id) {
            return Err(ConfigError::Validation(format!(
                "vehicle.toml::chassis.sprite_id references unknown sprite id `{}`",
                chassis.sprite_id
            )));
        }
        if let Some(wheel_sprite) = self.vehicle.wheels.sprite_id.as_deref() {
            if !self.sprite_assets_by_id.contains_key(wheel_sprite) {
                return Err(ConfigError::Validation(format!(
                    "vehicle.toml::wheels.sprite_id references unknown sprite id `{wheel_sprite}`"
                )));
            }
        }
        if !(0.0..=1.0).contains(&chassis.alpha_threshold) {
            return Err(ConfigError::Validation(
                "vehicle.toml::chassis.alpha_threshold must be within [0, 1]".to_string(),
            ));
        }
        if chassis.simplify_tolerance_px < 0.0 || chassis.density <= 0.0 {
            return Err(ConfigError::Validation(
                "vehicle.toml::chassis needs simplify_tolerance_px >= 0 and density > 0"
                    .to_string(),
            ));
        }

        let wheels = &self.vehicle.wheels;
        if wheels.radius_px <= 0.0 || wheels.density <= 0.0 {
            return Err(ConfigError::Validation(
                "vehicle.toml::wheels.radius_px and density must be > 0".to_string(),
            ));
        }

        let drive = &self.vehicle.drive;
        if drive.max_wheel_angular_speed <= 0.0 {
            return Err(ConfigError::Validation(
                "vehicle.toml::drive.max_wheel_angular_speed must be > 0".to_string(),
            ));
        }
        if drive.min_jump_strength < 0.0 || drive.jump_wait_seconds < 0.0 {
            return Err(ConfigError::Validation(
                "vehicle.toml::drive.min_jump_strength and jump_wait_seconds must be >= 0"
                    .to_string(),
            ));
        }

        let input = &self.vehicle.input;
        for (label, keys) in [
            ("forward", &input.forward),
            ("backward", &input.backward),
            ("jump_forward", &input.jump_forward),
            ("jump_backward", &input.jump_backward),
        ] {
            if keys.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "vehicle.toml::input.{label} must bind at least one key"
                )));
            }
            for key in keys {
                if parse_key_code(key).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "vehicle.toml::input.{label} has unknown key name `{key}`"
                    )));
                }
            }
        }

        let music = &self.levels.music;
        if music.gameplay.is_empty() {
            return Err(ConfigError::Validation(
                "levels.toml::music.gameplay must list at least one track".to_string(),
            ));
        }
        let referenced_audio = music
            .gameplay
            .iter()
            .map(|id| ("levels.toml::music.gameplay", id.as_str()))
            .chain([
                ("levels.toml::music.menu", music.menu.as_str()),
                ("levels.toml::music.completed_theme", music.completed_theme.as_str()),
            ]);
        for (label, audio_id) in referenced_audio {
            if !self.audio_assets_by_id.contains_key(audio_id) {
                return Err(ConfigError::Validation(format!(
                    "{label} references unknown audio id `{audio_id}`"
                )));
            }
        }

        for (index, sprite) in self.assets.sprites.iter().enumerate() {
            if sprite.path.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "assets.toml::sprites[{index}].path cannot be empty"
                )));
            }
        }
        for (index, audio) in self.assets.audio.iter().enumerate() {
            if audio.path.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "assets.toml::audio[{index}].path cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
            Self::Validation(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn to_index<T>(label: &str, rows: &[T]) -> Result<HashMap<String, T>, ConfigError>
where
    T: HasId + Clone,
{
    let mut map = HashMap::new();

    for row in rows {
        let id = row.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label} contains an empty id"
            )));
        }

        if map.insert(id.to_string(), row.clone()).is_some() {
            return Err(ConfigError::Validation(format!(
                "{label} contains duplicate id `{id}`"
            )));
        }
    }

    Ok(map)
}

trait HasId {
    fn id(&self) -> &str;
}

/// Maps the key names used in `vehicle.toml` onto Bevy key codes.
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let key = match name.trim() {
        "ArrowRight" | "Right" => KeyCode::ArrowRight,
        "ArrowLeft" | "Left" => KeyCode::ArrowLeft,
        "ArrowUp" | "Up" => KeyCode::ArrowUp,
        "ArrowDown" | "Down" => KeyCode::ArrowDown,
        "Space" => KeyCode::Space,
        "ShiftLeft" => KeyCode::ShiftLeft,
        "ShiftRight" => KeyCode::ShiftRight,
        "A" => KeyCode::KeyA,
        "D" => KeyCode::KeyD,
        "E" => KeyCode::KeyE,
        "Q" => KeyCode::KeyQ,
        "S" => KeyCode::KeyS,
        "W" => KeyCode::KeyW,
        "Z" => KeyCode::KeyZ,
        "X" => KeyCode::KeyX,
        _ => return None,
    };
    Some(key)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFile {
    pub app: AppConfig,
    pub physics: PhysicsConfig,
    pub level: LevelRulesConfig,
    pub terrain: TerrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub window_title: String,
    pub level_count: u32,
    pub progress_path: String,
    pub debug_overlay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhysicsConfig {
    pub world_scale: f32,
    pub gravity: f32,
    pub max_step_seconds: f32,
    pub settle_steps: u32,
    pub settle_step_seconds: f32,
    /// Physics stops advancing once the vehicle's right edge is this close to the level's far edge.
    #[serde(default)]
    pub far_edge_freeze_margin_px: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelRulesConfig {
    pub loading_delay_seconds: f32,
    pub resume_delay_seconds: f32,
    pub upside_down_timeout_seconds: f32,
    pub fall_threshold_px: f32,
    #[serde(default = "default_inverted_min_degrees")]
    pub inverted_min_degrees: f32,
    #[serde(default = "default_inverted_max_degrees")]
    pub inverted_max_degrees: f32,
}

fn default_inverted_min_degrees() -> f32 {
    120.0
}

fn default_inverted_max_degrees() -> f32 {
    240.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainConfig {
    pub restitution: f32,
    pub density: f32,
    pub polygon_friction: f32,
    pub rectangle_friction: f32,
    pub boundary_wall_width_px: f32,
    pub boundary_wall_gap_px: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleFile {
    pub chassis: ChassisConfig,
    pub wheels: WheelConfig,
    pub drive: DriveConfig,
    pub input: VehicleInputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChassisConfig {
    pub sprite_id: String,
    pub alpha_threshold: f32,
    pub simplify_tolerance_px: f32,
    /// Body origin relative to the traced outline's centroid, in sprite pixels.
    pub origin_offset_px: [f32; 2],
    pub restitution: f32,
    pub density: f32,
    #[serde(default = "default_chassis_friction")]
    pub friction: f32,
}

fn default_chassis_friction() -> f32 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct WheelConfig {
    #[serde(default)]
    pub sprite_id: Option<String>,
    pub radius_px: f32,
    pub front_offset_px: [f32; 2],
    pub rear_offset_px: [f32; 2],
    pub restitution: f32,
    pub friction: f32,
    pub density: f32,
    pub angular_damping: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    pub wheel_torque: f32,
    pub max_wheel_angular_speed: f32,
    pub jump_impulse: f32,
    pub jump_strength: f32,
    pub min_jump_strength: f32,
    pub jump_wait_seconds: f32,
    pub jump_forward_offset_px: f32,
    pub jump_backward_offset_px: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleInputConfig {
    pub forward: Vec<String>,
    pub backward: Vec<String>,
    pub jump_forward: Vec<String>,
    pub jump_backward: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelsFile {
    pub music: MusicConfig,
    pub levels: Vec<LevelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicConfig {
    pub menu: String,
    pub gameplay: Vec<String>,
    pub completed_theme: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelConfig {
    pub id: u32,
    pub map: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssetsFile {
    #[serde(default)]
    pub sprites: Vec<SpriteAssetConfig>,
    #[serde(default)]
    pub audio: Vec<AudioAssetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpriteAssetConfig {
    pub id: String,
    pub path: String,
}

impl HasId for SpriteAssetConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioAssetConfig {
    pub id: String,
    pub path: String,
}

impl HasId for AudioAssetConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_config() -> GameConfig {
        let assets = AssetsFile {
            sprites: vec![SpriteAssetConfig {
                id: "rover_model".to_string(),
                path: "sprites/rover_model.png".to_string(),
            }],
            audio: ["new_menu", "new_music1", "new_music2", "level_win"]
                .iter()
                .map(|id| AudioAssetConfig {
                    id: id.to_string(),
                    path: format!("audio/{id}.ogg"),
                })
                .collect(),
        };

        GameConfig {
            game: GameFile {
                app: AppConfig {
                    window_title: "TRON FG".to_string(),
                    level_count: 2,
                    progress_path: "save/progress.json".to_string(),
                    debug_overlay: false,
                },
                physics: PhysicsConfig {
                    world_scale: 40.0,
                    gravity: 10.0,
                    max_step_seconds: 0.033,
                    settle_steps: 60,
                    settle_step_seconds: 1.0 / 60.0,
                    far_edge_freeze_margin_px: None,
                },
                level: LevelRulesConfig {
                    loading_delay_seconds: 0.2,
                    resume_delay_seconds: 0.6,
                    upside_down_timeout_seconds: 3.0,
                    fall_threshold_px: -100.0,
                    inverted_min_degrees: 120.0,
                    inverted_max_degrees: 240.0,
                },
                terrain: TerrainConfig {
                    restitution: 0.5,
                    density: 1.0,
                    polygon_friction: 1.0,
                    rectangle_friction: 0.2,
                    boundary_wall_width_px: 10.0,
                    boundary_wall_gap_px: 10.0,
                },
            },
            vehicle: VehicleFile {
                chassis: ChassisConfig {
                    sprite_id: "rover_model".to_string(),
                    alpha_threshold: 0.5,
                    simplify_tolerance_px: 4.0,
                    origin_offset_px: [0.0, -33.0],
                    restitution: 0.3,
                    density: 1.0,
                    friction: 0.2,
                },
                wheels: WheelConfig {
                    sprite_id: None,
                    radius_px: 22.0,
                    front_offset_px: [62.0, 18.0],
                    rear_offset_px: [-68.0, 18.0],
                    restitution: 0.2,
                    friction: 0.8,
                    density: 0.4,
                    angular_damping: 1.0,
                },
                drive: DriveConfig {
                    wheel_torque: 12.0,
                    max_wheel_angular_speed: 20.0,
                    jump_impulse: 12.0,
                    jump_strength: 3.0,
                    min_jump_strength: 0.2,
                    jump_wait_seconds: 0.3,
                    jump_forward_offset_px: -4.0,
                    jump_backward_offset_px: 5.0,
                },
                input: VehicleInputConfig {
                    forward: vec!["D".to_string(), "ArrowRight".to_string()],
                    backward: vec!["A".to_string(), "ArrowLeft".to_string()],
                    jump_forward: vec!["W".to_string()],
                    jump_backward: vec!["S".to_string()],
                },
            },
            levels: LevelsFile {
                music: MusicConfig {
                    menu: "new_menu".to_string(),
                    gameplay: vec!["new_music1".to_string(), "new_music2".to_string()],
                    completed_theme: "level_win".to_string(),
                },
                levels: vec![
                    LevelConfig {
                        id: 1,
                        map: "maps/level1.json".to_string(),
                    },
                    LevelConfig {
                        id: 2,
                        map: "maps/level2.json".to_string(),
                    },
                ],
            },
            sprite_assets_by_id: to_index("assets.toml::sprites", &assets.sprites)
                .expect("sample sprites index"),
            audio_assets_by_id: to_index("assets.toml::audio", &assets.audio)
                .expect("sample audio index"),
            assets,
        }
    }

    #[test]
    fn sample_config_passes_validation() {
        sample_config()
            .validate_references()
            .expect("sample config should be valid");
    }

    #[test]
    fn validation_fails_for_gap_in_level_ids() {
        let mut config = sample_config();
        config.levels.levels[1].id = 3;

        let error = config
            .validate_references()
            .expect_err("level ids must run 1..=level_count");
        assert!(error.to_string().contains("missing level id 2"));
    }

    #[test]
    fn validation_fails_for_unknown_music_track() {
        let mut config = sample_config();
        config.levels.music.gameplay.push("new_music9".to_string());

        let error = config
            .validate_references()
            .expect_err("unknown audio ids must be rejected");
        assert!(error.to_string().contains("new_music9"));
    }

    #[test]
    fn validation_fails_for_inverted_band_out_of_order() {
        let mut config = sample_config();
        config.game.level.inverted_min_degrees = 250.0;

        assert!(config.validate_references().is_err());
    }

    #[test]
    fn validation_fails_for_unknown_key_name() {
        let mut config = sample_config();
        config.vehicle.input.jump_forward = vec!["Hyper".to_string()];

        let error = config
            .validate_references()
            .expect_err("unknown key names must be rejected");
        assert!(error.to_string().contains("Hyper"));
    }

    #[test]
    fn duplicate_asset_ids_are_rejected() {
        let rows = vec![
            AudioAssetConfig {
                id: "click".to_string(),
                path: "audio/click.ogg".to_string(),
            },
            AudioAssetConfig {
                id: "click".to_string(),
                path: "audio/click2.ogg".to_string(),
            },
        ];

        assert!(to_index("assets.toml::audio", &rows).is_err());
    }

    #[test]
    fn shipped_config_files_parse() {
        let config_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(CONFIG_DIR);
        let config = GameConfig::load_from_dir(&config_dir).expect("shipped config should load");
        assert_eq!(config.level_count(), 16);
    }
}
