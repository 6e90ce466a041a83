use crate::config::{DriveConfig, VehicleFile};
use crate::gameplay::level::geometry::{
    polygon_centroid, simplify_closed_outline, trace_outline, triangulate, AlphaMask,
    OutlineError, Triangle,
};
use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelSide {
    Front,
    Rear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelPlan {
    pub side: WheelSide,
    /// Joint anchor and spawn offset relative to the chassis origin, world units.
    pub offset: Vec2,
    pub radius: f32,
}

/// Everything needed to spawn the chassis and wheels, in chassis-local world units.
#[derive(Debug, Clone)]
pub struct RigPlan {
    pub chassis_triangles: Vec<Triangle>,
    pub outline_vertex_count: usize,
    pub wheels: [WheelPlan; 2],
    pub sprite_offset: Vec2,
    pub sprite_size: Vec2,
    pub right_extent: f32,
}

pub fn plan_rig(
    mask: &AlphaMask,
    vehicle: &VehicleFile,
    world_scale: f32,
) -> Result<RigPlan, OutlineError> {
    let chassis = &vehicle.chassis;
    let outline = trace_outline(mask)?;
    let simplified = simplify_closed_outline(&outline, chassis.simplify_tolerance_px);
    let origin_px = polygon_centroid(&simplified) + Vec2::from(chassis.origin_offset_px);

    let local: Vec<Vec2> = simplified
        .iter()
        .map(|point| (*point - origin_px) / world_scale)
        .collect();
    let chassis_triangles = triangulate(&local);
    if chassis_triangles.is_empty() {
        return Err(OutlineError::Degenerate {
            vertex_count: simplified.len(),
        });
    }

    let wheels = &vehicle.wheels;
    let radius = wheels.radius_px / world_scale;
    let image_size_px = Vec2::new(mask.width() as f32, mask.height() as f32);
    let right_extent = local
        .iter()
        .map(|point| point.x)
        .fold(f32::NEG_INFINITY, f32::max);

    Ok(RigPlan {
        outline_vertex_count: simplified.len(),
        chassis_triangles,
        wheels: [
            WheelPlan {
                side: WheelSide::Front,
                offset: Vec2::from(wheels.front_offset_px) / world_scale,
                radius,
            },
            WheelPlan {
                side: WheelSide::Rear,
                offset: Vec2::from(wheels.rear_offset_px) / world_scale,
                radius,
            },
        ],
        sprite_offset: (image_size_px * 0.5 - origin_px) / world_scale,
        sprite_size: image_size_px / world_scale,
        right_extent,
    })
}

/// Torque for one wheel this step. Spin-up stops at the angular speed limit.
pub fn wheel_torque(
    forward: bool,
    backward: bool,
    angular_velocity: f32,
    torque: f32,
    max_angular_speed: f32,
) -> f32 {
    let mut applied = 0.0;
    if forward && -angular_velocity < max_angular_speed {
        applied -= torque;
    }
    if backward && angular_velocity < max_angular_speed {
        applied += torque;
    }
    applied
}

/// Linear impulse and world application point for a jump.
pub fn jump_impulse(
    direction: JumpDirection,
    strength: f32,
    drive: &DriveConfig,
    world_scale: f32,
    world_center_of_mass: Vec2,
) -> (Vec2, Vec2) {
    let strength = strength.max(drive.min_jump_strength);
    let offset_px = match direction {
        JumpDirection::Forward => drive.jump_forward_offset_px,
        JumpDirection::Backward => drive.jump_backward_offset_px,
    };

    (
        Vec2::new(0.0, drive.jump_impulse * strength),
        world_center_of_mass + Vec2::new(offset_px / world_scale, 0.0),
    )
}

/// Ground-contact bookkeeping for the player's rig.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleControl {
    touching_ground: bool,
    jump_wait: f32,
    destroyed: bool,
}

impl VehicleControl {
    /// Contact is not trusted until the post-jump wait has run out.
    pub fn is_touching_ground(&self) -> bool {
        self.jump_wait <= 0.0 && self.touching_ground
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn jump_wait(&self) -> f32 {
        self.jump_wait.max(0.0)
    }

    pub fn touch_ground(&mut self) {
        self.touching_ground = true;
    }

    pub fn begin_jump(&mut self, wait_seconds: f32) {
        self.touching_ground = false;
        self.jump_wait = wait_seconds;
    }

    pub fn tick(&mut self, delta_seconds: f32) {
        if self.jump_wait > 0.0 {
            self.jump_wait -= delta_seconds;
        }
    }

    /// Returns true only for the first call.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        true
    }
}
