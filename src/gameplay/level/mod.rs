pub mod camera;
pub mod contact;
pub mod geometry;
pub mod lifecycle;
pub mod map;
pub mod terrain;

use crate::assets::{AssetRegistry, ASSET_ROOT_DIR};
use crate::config::GameConfig;
use crate::gameplay::sfx::{AudioCommand, MusicDeck, AUDIO_ID_CLICK, AUDIO_ID_CRASH, AUDIO_ID_LEVEL_COMPLETED};
use crate::gameplay::vehicle::rig::{plan_rig, RigPlan, VehicleControl};
use crate::gameplay::vehicle::{
    chassis_rotation_degrees, destroy_vehicle, spawn_vehicle_rig, PendingWorldMutations,
    PlayerVehicle, RigVisuals, VehicleRig,
};
use crate::states::GameState;
use bevy::asset::LoadState;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use camera::{camera_follow_vehicle, configure_level_camera, reset_menu_camera, CameraFollowState};
use contact::{classify_collision_events, VehicleContactMessage};
use geometry::{AlphaMask, OutlineError};
use lifecycle::{
    should_step_physics, FailReason, LevelPhase, LevelResult, LevelRules, LevelSession,
    LevelSignal,
};
use map::{LevelMap, LevelMapError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use terrain::{plan_terrain, spawn_terrain, TerrainPlan, TerrainRules};

pub struct LevelPlugin;

impl Plugin for LevelPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<LevelLoadRequest>()
            .add_message::<LevelLoadFailed>()
            .add_message::<LevelSignal>()
            .add_message::<VehicleContactMessage>()
            .init_resource::<CameraFollowState>()
            .configure_sets(
                Update,
                (
                    LevelSystems::Load,
                    LevelSystems::Control,
                    LevelSystems::Contacts,
                    LevelSystems::Rules,
                    LevelSystems::Stepping,
                )
                    .chain(),
            )
            .add_systems(
                Update,
                handle_level_load_requests
                    .in_set(LevelSystems::Load)
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                Update,
                (finish_level_loading, build_level_world)
                    .chain()
                    .in_set(LevelSystems::Load)
                    .after(handle_level_load_requests)
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<LevelSession>),
            )
            .add_systems(
                Update,
                level_controls
                    .in_set(LevelSystems::Control)
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<LevelSession>),
            )
            .add_systems(
                Update,
                (classify_collision_events, apply_vehicle_contacts)
                    .chain()
                    .in_set(LevelSystems::Contacts)
                    .run_if(in_state(GameState::InLevel)),
            )
            .add_systems(
                Update,
                update_level_rules
                    .in_set(LevelSystems::Rules)
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<LevelSession>),
            )
            .add_systems(
                Update,
                (apply_physics_stepping, camera_follow_vehicle)
                    .in_set(LevelSystems::Stepping)
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(OnEnter(GameState::InLevel), configure_level_camera)
            .add_systems(
                OnExit(GameState::InLevel),
                (teardown_level, reset_menu_camera),
            );
    }
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum LevelSystems {
    Load,
    Control,
    Contacts,
    Rules,
    Stepping,
}

/// Everything spawned for a level; despawned wholesale on teardown.
#[derive(Component)]
pub struct LevelEntity;

/// Level extent in world units.
#[derive(Resource, Debug, Clone, Copy)]
pub struct LevelBounds {
    pub size: Vec2,
}

#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelBuild {
    #[default]
    Pending,
    Settling,
    Ready,
    Failed,
}

/// Gameplay track chosen for the running level.
#[derive(Resource, Debug, Clone, Default)]
pub struct LevelMusic(pub Option<String>);

#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct LevelLoadRequest {
    pub level_id: u32,
    pub music: Option<String>,
}

#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct LevelLoadFailed {
    pub level_id: u32,
    pub reason: String,
}

#[derive(Debug)]
pub enum LevelContentError {
    UnknownLevel(u32),
    MissingSprite(String),
    Map(LevelMapError),
    Outline(OutlineError),
}

impl Display for LevelContentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(id) => write!(f, "level {id} is not configured"),
            Self::MissingSprite(id) => write!(f, "sprite `{id}` could not be loaded"),
            Self::Map(error) => write!(f, "{error}"),
            Self::Outline(error) => write!(f, "chassis outline: {error}"),
        }
    }
}

impl Error for LevelContentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Map(error) => Some(error),
            Self::Outline(error) => Some(error),
            _ => None,
        }
    }
}

impl From<LevelMapError> for LevelContentError {
    fn from(error: LevelMapError) -> Self {
        Self::Map(error)
    }
}

impl From<OutlineError> for LevelContentError {
    fn from(error: OutlineError) -> Self {
        Self::Outline(error)
    }
}

#[derive(Debug, Clone)]
pub struct PreparedLevel {
    pub terrain: TerrainPlan,
    pub rig: RigPlan,
    pub spawn: Vec2,
    pub decor_layers: Vec<String>,
}

/// Loads the map and traces the chassis. Nothing is spawned on failure.
pub fn prepare_level(
    config: &GameConfig,
    level_id: u32,
    chassis_mask: &AlphaMask,
) -> Result<PreparedLevel, LevelContentError> {
    let level = config
        .level(level_id)
        .ok_or(LevelContentError::UnknownLevel(level_id))?;
    let map = LevelMap::load(&Path::new(ASSET_ROOT_DIR).join(&level.map))?;
    let world_scale = config.game.physics.world_scale;

    let terrain = plan_terrain(&map, &TerrainRules::from_config(config));
    let rig = plan_rig(chassis_mask, &config.vehicle, world_scale)?;

    Ok(PreparedLevel {
        terrain,
        rig,
        spawn: map.spawn / world_scale,
        decor_layers: map.decor_layers,
    })
}

pub fn alpha_mask_from_image(image: &Image, alpha_threshold: f32) -> AlphaMask {
    let size = image.size();
    AlphaMask::from_fn(size.x, size.y, |x, y| {
        image
            .get_color_at(x, y)
            .is_ok_and(|color| color.alpha() > alpha_threshold)
    })
}

fn variable_timestep(config: &GameConfig) -> TimestepMode {
    TimestepMode::Variable {
        max_dt: config.game.physics.max_step_seconds,
        time_scale: 1.0,
        substeps: 1,
    }
}

fn settle_timestep(config: &GameConfig) -> TimestepMode {
    let physics = &config.game.physics;
    TimestepMode::Fixed {
        dt: physics.settle_steps as f32 * physics.settle_step_seconds,
        substeps: physics.settle_steps.max(1) as usize,
    }
}

fn despawn_level_entities(commands: &mut Commands, level_entities: &Query<Entity, With<LevelEntity>>) {
    for entity in level_entities {
        commands.entity(entity).try_despawn();
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_level_load_requests(
    mut commands: Commands,
    config: Res<GameConfig>,
    state: Res<State<GameState>>,
    mut requests: MessageReader<LevelLoadRequest>,
    level_entities: Query<Entity, With<LevelEntity>>,
    mut pending: ResMut<PendingWorldMutations>,
    mut follow_state: ResMut<CameraFollowState>,
    mut next_state: ResMut<NextState<GameState>>,
    mut audio: MessageWriter<AudioCommand>,
) {
    let Some(request) = requests.read().last().cloned() else {
        return;
    };

    despawn_level_entities(&mut commands, &level_entities);
    pending.clear();
    *follow_state = CameraFollowState::default();
    audio.write(AudioCommand::StopMusic);

    commands.insert_resource(LevelSession::new(
        request.level_id,
        LevelRules::from_config(&config),
    ));
    commands.insert_resource(LevelBuild::default());
    commands.insert_resource(LevelMusic(request.music.clone()));
    commands.remove_resource::<LevelBounds>();

    if *state.get() != GameState::InLevel {
        next_state.set(GameState::InLevel);
    }
    info!(
        "Loading level {} (music: {}).",
        request.level_id,
        request.music.as_deref().unwrap_or("none")
    );
}

#[allow(clippy::too_many_arguments)]
fn build_level_world(
    mut commands: Commands,
    config: Res<GameConfig>,
    registry: Option<Res<AssetRegistry>>,
    asset_server: Res<AssetServer>,
    images: Res<Assets<Image>>,
    session: Res<LevelSession>,
    mut build: ResMut<LevelBuild>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<ColorMaterial>>,
    mut timestep: ResMut<TimestepMode>,
    mut load_failed: MessageWriter<LevelLoadFailed>,
) {
    if *build != LevelBuild::Pending {
        return;
    }
    let Some(registry) = registry else {
        return;
    };

    let level_id = session.level_id();
    let chassis_id = &config.vehicle.chassis.sprite_id;
    let chassis_image = match registry.sprite_handle(chassis_id) {
        Some(handle) if matches!(asset_server.load_state(handle.id()), LoadState::Failed(_)) => {
            None
        }
        Some(handle) => match images.get(&handle) {
            Some(image) => Some((handle, image)),
            None => return,
        },
        None => None,
    };
    let Some((chassis_handle, chassis_image)) = chassis_image else {
        fail_level_build(
            &mut build,
            &mut load_failed,
            level_id,
            LevelContentError::MissingSprite(chassis_id.clone()),
        );
        return;
    };

    let mask = alpha_mask_from_image(chassis_image, config.vehicle.chassis.alpha_threshold);
    let prepared = match prepare_level(&config, level_id, &mask) {
        Ok(prepared) => prepared,
        Err(error) => {
            fail_level_build(&mut build, &mut load_failed, level_id, error);
            return;
        }
    };

    spawn_terrain(&mut commands, &mut meshes, &mut materials, &prepared.terrain);
    let visuals = RigVisuals {
        chassis_sprite: Some(chassis_handle),
        wheel_sprite: config
            .vehicle
            .wheels
            .sprite_id
            .as_deref()
            .and_then(|id| registry.sprite_handle(id)),
    };
    spawn_vehicle_rig(
        &mut commands,
        &mut meshes,
        &mut materials,
        &config,
        &prepared.rig,
        prepared.spawn,
        &visuals,
    );

    commands.insert_resource(LevelBounds {
        size: prepared.terrain.level_size,
    });
    *timestep = settle_timestep(&config);
    *build = LevelBuild::Settling;

    if prepared.terrain.skipped_polygons > 0 {
        warn!(
            "Level {level_id}: skipped {} degenerate land polygon(s).",
            prepared.terrain.skipped_polygons
        );
    }
    info!(
        "Level {level_id} built: {} terrain fixtures, chassis outline {} vertices / {} triangles, decor layers {:?}.",
        prepared.terrain.fixtures.len(),
        prepared.rig.outline_vertex_count,
        prepared.rig.chassis_triangles.len(),
        prepared.decor_layers,
    );
}

fn fail_level_build(
    build: &mut LevelBuild,
    load_failed: &mut MessageWriter<LevelLoadFailed>,
    level_id: u32,
    error: LevelContentError,
) {
    error!("Level {level_id} could not be built: {error}");
    *build = LevelBuild::Failed;
    load_failed.write(LevelLoadFailed {
        level_id,
        reason: error.to_string(),
    });
}

/// Runs before the build step so the settle frame gets one full physics update.
fn finish_level_loading(
    time: Res<Time>,
    config: Res<GameConfig>,
    music: Option<Res<LevelMusic>>,
    mut build: ResMut<LevelBuild>,
    mut session: ResMut<LevelSession>,
    mut timestep: ResMut<TimestepMode>,
    mut audio: MessageWriter<AudioCommand>,
) {
    if *build == LevelBuild::Settling {
        *timestep = variable_timestep(&config);
        *build = LevelBuild::Ready;
    }

    if session.advance_loading(time.delta_secs(), *build == LevelBuild::Ready) {
        if let Some(track) = music.and_then(|music| music.0.clone()) {
            audio.write(AudioCommand::PlayMusic {
                id: track,
                looped: true,
            });
        }
        info!("Level {} started.", session.level_id());
    }
}

#[allow(clippy::too_many_arguments)]
fn level_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    music: Option<Res<LevelMusic>>,
    deck: Res<MusicDeck>,
    mut session: ResMut<LevelSession>,
    mut signals: MessageWriter<LevelSignal>,
    mut audio: MessageWriter<AudioCommand>,
) {
    let level_id = session.level_id();
    let pause_pressed = keyboard.any_just_pressed([KeyCode::Escape, KeyCode::KeyP]);
    let confirm_pressed = keyboard.any_just_pressed([KeyCode::Enter, KeyCode::Space]);
    let restart_pressed = keyboard.just_pressed(KeyCode::KeyR);
    let quit_pressed = keyboard.just_pressed(KeyCode::KeyQ);

    let mut menu_signal = None;
    match session.phase() {
        LevelPhase::Loading => {}
        LevelPhase::Playing => {
            if pause_pressed {
                if let Some(signal) = session.pause() {
                    signals.write(signal);
                    audio.write(AudioCommand::PauseMusic);
                }
            }
        }
        LevelPhase::Paused => {
            if pause_pressed {
                if let Some(signal) = session.resume() {
                    signals.write(signal);
                    let track = music.and_then(|music| music.0.clone());
                    if deck.is_paused() {
                        audio.write(AudioCommand::ResumeMusic);
                    } else if let Some(track) = track {
                        audio.write(AudioCommand::PlayMusic {
                            id: track,
                            looped: true,
                        });
                    }
                }
            } else if restart_pressed {
                menu_signal = Some(LevelSignal::Restart { level_id });
            } else if quit_pressed {
                menu_signal = Some(LevelSignal::Quit { level_id });
            }
        }
        LevelPhase::Completed => {
            if confirm_pressed {
                menu_signal = Some(LevelSignal::Next { level_id });
            } else if restart_pressed {
                menu_signal = Some(LevelSignal::Restart { level_id });
            } else if quit_pressed || pause_pressed {
                menu_signal = Some(LevelSignal::Quit { level_id });
            }
        }
        LevelPhase::Failed => {
            if confirm_pressed || restart_pressed {
                menu_signal = Some(LevelSignal::Restart { level_id });
            } else if quit_pressed || pause_pressed {
                menu_signal = Some(LevelSignal::Quit { level_id });
            }
        }
    }

    if let Some(signal) = menu_signal {
        audio.write(AudioCommand::sound(AUDIO_ID_CLICK));
        signals.write(signal);
    }
}

fn apply_vehicle_contacts(
    config: Res<GameConfig>,
    session: Option<ResMut<LevelSession>>,
    mut contacts: MessageReader<VehicleContactMessage>,
    mut chassis_query: Query<(&Transform, &mut VehicleControl), With<PlayerVehicle>>,
    mut signals: MessageWriter<LevelSignal>,
    mut audio: MessageWriter<AudioCommand>,
) {
    let Some(mut session) = session else {
        contacts.clear();
        return;
    };

    for contact in contacts.read() {
        match contact {
            VehicleContactMessage::FinishReached => {
                if let Some(result) = session.complete() {
                    announce_completion(&config, result, &mut signals, &mut audio);
                }
            }
            VehicleContactMessage::GroundTouched { chassis } => {
                let Ok((transform, mut control)) = chassis_query.single_mut() else {
                    continue;
                };
                control.touch_ground();
                if *chassis {
                    session.on_chassis_ground_contact(
                        chassis_rotation_degrees(transform),
                        control.is_destroyed(),
                    );
                }
            }
        }
    }
}

fn announce_completion(
    config: &GameConfig,
    result: LevelResult,
    signals: &mut MessageWriter<LevelSignal>,
    audio: &mut MessageWriter<AudioCommand>,
) {
    info!(
        "Level {} completed in {:.2}s.",
        result.level_id, result.elapsed_seconds
    );
    audio.write(AudioCommand::StopMusic);
    audio.write(AudioCommand::sound(AUDIO_ID_LEVEL_COMPLETED));
    audio.write(AudioCommand::music(&config.levels.music.completed_theme, false));
    signals.write(LevelSignal::Completed {
        level_id: result.level_id,
        elapsed_seconds: result.elapsed_seconds,
    });
}

fn announce_failure(
    result: LevelResult,
    reason: FailReason,
    signals: &mut MessageWriter<LevelSignal>,
    audio: &mut MessageWriter<AudioCommand>,
) {
    info!(
        "Level {} failed after {:.2}s: {reason:?}.",
        result.level_id, result.elapsed_seconds
    );
    audio.write(AudioCommand::StopMusic);
    audio.write(AudioCommand::sound(AUDIO_ID_CRASH));
    signals.write(LevelSignal::Failed {
        level_id: result.level_id,
        elapsed_seconds: result.elapsed_seconds,
        reason,
    });
}

fn update_level_rules(
    time: Res<Time>,
    config: Res<GameConfig>,
    mut session: ResMut<LevelSession>,
    mut pending: ResMut<PendingWorldMutations>,
    mut chassis_query: Query<(Entity, &Transform, &mut VehicleControl), With<PlayerVehicle>>,
    mut signals: MessageWriter<LevelSignal>,
    mut audio: MessageWriter<AudioCommand>,
) {
    let delta = time.delta_secs();
    session.tick(delta);

    let Ok((chassis, transform, mut control)) = chassis_query.single_mut() else {
        return;
    };

    let rotation = chassis_rotation_degrees(transform);
    if let Some(result) = session.update_upside_down(delta, rotation) {
        destroy_vehicle(chassis, &mut control, &mut pending);
        announce_failure(result, FailReason::UpsideDown, &mut signals, &mut audio);
    }

    let y_px = transform.translation.y * config.game.physics.world_scale;
    if let Some(result) = session.check_fall(y_px) {
        announce_failure(result, FailReason::FellOut, &mut signals, &mut audio);
    }
}

fn apply_physics_stepping(
    config: Res<GameConfig>,
    session: Option<Res<LevelSession>>,
    build: Option<Res<LevelBuild>>,
    bounds: Option<Res<LevelBounds>>,
    rig_query: Query<(&Transform, &VehicleRig)>,
    mut rapier_query: Query<&mut RapierConfiguration, With<DefaultRapierContext>>,
) {
    let Ok(mut rapier_config) = rapier_query.single_mut() else {
        return;
    };

    let physics = &config.game.physics;
    rapier_config.gravity = Vec2::new(0.0, -physics.gravity.max(0.0));

    let settling = build.is_some_and(|build| *build == LevelBuild::Settling);
    let Some(session) = session else {
        rapier_config.physics_pipeline_active = false;
        return;
    };

    let right_px = rig_query
        .single()
        .map(|(transform, rig)| (transform.translation.x + rig.right_extent) * physics.world_scale)
        .unwrap_or(0.0);
    let width_px = bounds
        .map(|bounds| bounds.size.x * physics.world_scale)
        .unwrap_or(f32::INFINITY);

    rapier_config.physics_pipeline_active = settling
        || should_step_physics(
            session.phase(),
            right_px,
            width_px,
            physics.far_edge_freeze_margin_px,
        );
}

fn teardown_level(
    mut commands: Commands,
    config: Res<GameConfig>,
    level_entities: Query<Entity, With<LevelEntity>>,
    mut pending: ResMut<PendingWorldMutations>,
    mut timestep: ResMut<TimestepMode>,
    mut rapier_query: Query<&mut RapierConfiguration, With<DefaultRapierContext>>,
    mut audio: MessageWriter<AudioCommand>,
) {
    despawn_level_entities(&mut commands, &level_entities);
    pending.clear();
    *timestep = variable_timestep(&config);
    if let Ok(mut rapier_config) = rapier_query.single_mut() {
        rapier_config.physics_pipeline_active = false;
    }
    audio.write(AudioCommand::StopMusic);

    commands.remove_resource::<LevelSession>();
    commands.remove_resource::<LevelBuild>();
    commands.remove_resource::<LevelBounds>();
    commands.remove_resource::<LevelMusic>();
    info!("Level torn down.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    fn rover_mask() -> AlphaMask {
        AlphaMask::from_fn(200, 90, |x, y| {
            let y_up = 89 - y;
            ((10..190).contains(&x) && (30..65).contains(&y_up))
                || ((60..140).contains(&x) && (65..90).contains(&y_up))
        })
    }

    #[test]
    fn prepares_shipped_first_level() {
        let config = sample_config();

        let prepared = prepare_level(&config, 1, &rover_mask()).expect("level 1 prepares");

        assert!(prepared.terrain.fixtures.len() > 2);
        assert_eq!(prepared.terrain.skipped_polygons, 0);
        assert!(prepared.spawn.x > 0.0);
        assert!(prepared.terrain.finish.center.x > prepared.spawn.x);
    }

    #[test]
    fn unknown_level_is_a_content_error() {
        let config = sample_config();

        let error = prepare_level(&config, 99, &rover_mask()).expect_err("no level 99");

        assert!(matches!(error, LevelContentError::UnknownLevel(99)));
    }

    #[test]
    fn transparent_chassis_aborts_before_spawning() {
        let config = sample_config();
        let mask = AlphaMask::from_fn(32, 32, |_, _| false);

        let error = prepare_level(&config, 1, &mask).expect_err("nothing to trace");

        assert!(matches!(
            error,
            LevelContentError::Outline(OutlineError::NoOpaquePixels)
        ));
    }

    #[test]
    fn settle_timestep_covers_configured_steps() {
        let config = sample_config();

        let TimestepMode::Fixed { dt, substeps } = settle_timestep(&config) else {
            panic!("settling uses a fixed step");
        };
        assert_eq!(substeps, 60);
        assert!((dt - 1.0).abs() < 1e-4);
    }
}
