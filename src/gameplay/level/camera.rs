use super::LevelBounds;
use crate::config::GameConfig;
use crate::gameplay::vehicle::PlayerVehicle;
use bevy::prelude::*;
use bevy::window::PrimaryWindow;

const CAMERA_Z: f32 = 100.0;
const CAMERA_FOLLOW_SMOOTH_RATE_HZ: f32 = 8.0;

/// Keeps the view inside the level. Axes where the level is smaller than the view are centered.
pub fn clamp_camera_center(target: Vec2, half_view: Vec2, level_size: Vec2) -> Vec2 {
    let clamp_axis = |value: f32, half: f32, extent: f32| {
        if extent <= half * 2.0 {
            extent * 0.5
        } else {
            value.clamp(half, extent - half)
        }
    };

    Vec2::new(
        clamp_axis(target.x, half_view.x, level_size.x),
        clamp_axis(target.y, half_view.y, level_size.y),
    )
}

#[derive(Resource, Debug, Clone, Copy, Default)]
pub(super) struct CameraFollowState {
    initialized: bool,
}

pub(super) fn configure_level_camera(
    config: Res<GameConfig>,
    mut follow_state: ResMut<CameraFollowState>,
    mut camera_query: Query<&mut Projection, With<Camera2d>>,
) {
    *follow_state = CameraFollowState::default();
    let Ok(mut projection) = camera_query.single_mut() else {
        return;
    };

    if let Projection::Orthographic(ortho) = &mut *projection {
        ortho.scale = 1.0 / config.game.physics.world_scale;
    }
}

pub(super) fn reset_menu_camera(
    mut camera_query: Query<(&mut Projection, &mut Transform), With<Camera2d>>,
) {
    let Ok((mut projection, mut transform)) = camera_query.single_mut() else {
        return;
    };

    if let Projection::Orthographic(ortho) = &mut *projection {
        ortho.scale = 1.0;
    }
    transform.translation = Vec3::new(0.0, 0.0, CAMERA_Z);
}

pub(super) fn camera_follow_vehicle(
    time: Res<Time>,
    config: Res<GameConfig>,
    bounds: Option<Res<LevelBounds>>,
    mut follow_state: ResMut<CameraFollowState>,
    window_query: Query<&Window, With<PrimaryWindow>>,
    player_query: Query<&Transform, With<PlayerVehicle>>,
    mut camera_query: Query<&mut Transform, (With<Camera2d>, Without<PlayerVehicle>)>,
) {
    let Some(bounds) = bounds else {
        return;
    };
    let Ok(player_transform) = player_query.single() else {
        return;
    };
    let Ok(mut camera_transform) = camera_query.single_mut() else {
        return;
    };
    let Ok(window) = window_query.single() else {
        return;
    };

    let half_view = Vec2::new(window.width(), window.height()) * 0.5
        / config.game.physics.world_scale;
    let target = clamp_camera_center(
        player_transform.translation.truncate(),
        half_view,
        bounds.size,
    );

    let next = if follow_state.initialized {
        let blend = (CAMERA_FOLLOW_SMOOTH_RATE_HZ * time.delta_secs().max(0.000_1)).clamp(0.0, 1.0);
        camera_transform.translation.truncate().lerp(target, blend)
    } else {
        follow_state.initialized = true;
        target
    };
    camera_transform.translation = next.extend(CAMERA_Z);
}
