pub mod rig;

use crate::config::{parse_key_code, GameConfig};
use crate::gameplay::level::contact::BodyTag;
use crate::gameplay::level::lifecycle::{LevelPhase, LevelSession};
use crate::gameplay::level::{LevelEntity, LevelSystems};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use rig::{jump_impulse, wheel_torque, JumpDirection, RigPlan, VehicleControl, WheelSide};

const VEHICLE_Z: f32 = 10.0;
const WHEEL_Z: f32 = 10.5;

pub struct VehicleGameplayPlugin;

impl Plugin for VehicleGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<VehicleInputState>()
            .init_resource::<VehicleInputBindings>()
            .init_resource::<PendingWorldMutations>()
            .add_systems(
                Update,
                sync_input_bindings.run_if(resource_exists_and_changed::<GameConfig>),
            )
            .add_systems(
                Update,
                (
                    read_vehicle_input,
                    apply_wheel_torque,
                    apply_jump_requests,
                    tick_vehicle_control,
                )
                    .chain()
                    .in_set(LevelSystems::Control)
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                PostUpdate,
                drain_pending_world_mutations.after(PhysicsSet::Writeback),
            )
            .add_systems(OnExit(GameState::InLevel), clear_pending_world_mutations);
    }
}

/// Chassis body of the player's rig.
#[derive(Component)]
pub struct PlayerVehicle;

#[derive(Component, Debug, Clone, Copy)]
pub struct VehicleRig {
    pub front_wheel: Entity,
    pub rear_wheel: Entity,
    pub right_extent: f32,
}

#[derive(Component, Debug, Clone, Copy)]
pub struct VehicleWheel {
    pub side: WheelSide,
    pub chassis: Entity,
}

#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct VehicleInputState {
    pub forward: bool,
    pub backward: bool,
    pub jump_forward: bool,
    pub jump_backward: bool,
}

#[derive(Resource, Debug, Clone)]
struct VehicleInputBindings {
    forward: Vec<KeyCode>,
    backward: Vec<KeyCode>,
    jump_forward: Vec<KeyCode>,
    jump_backward: Vec<KeyCode>,
}

impl Default for VehicleInputBindings {
    fn default() -> Self {
        Self {
            forward: vec![KeyCode::KeyD, KeyCode::ArrowRight],
            backward: vec![KeyCode::KeyA, KeyCode::ArrowLeft],
            jump_forward: vec![KeyCode::KeyW, KeyCode::ArrowUp],
            jump_backward: vec![KeyCode::KeyS, KeyCode::ArrowDown],
        }
    }
}

impl VehicleInputBindings {
    fn from_config(config: &GameConfig) -> Self {
        let keys = |names: &[String]| names.iter().filter_map(|name| parse_key_code(name)).collect();
        let input = &config.vehicle.input;
        Self {
            forward: keys(&input.forward),
            backward: keys(&input.backward),
            jump_forward: keys(&input.jump_forward),
            jump_backward: keys(&input.jump_backward),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldMutation {
    DetachWheels { chassis: Entity },
}

/// Physics-world edits requested mid-frame, applied once the step has been written back.
#[derive(Resource, Debug, Default)]
pub struct PendingWorldMutations {
    queue: Vec<WorldMutation>,
}

impl PendingWorldMutations {
    pub fn push(&mut self, mutation: WorldMutation) {
        self.queue.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    fn drain(&mut self) -> std::vec::Drain<'_, WorldMutation> {
        self.queue.drain(..)
    }
}

/// Marks the rig destroyed and queues joint removal. Repeated calls are no-ops.
pub fn destroy_vehicle(
    chassis: Entity,
    control: &mut VehicleControl,
    pending: &mut PendingWorldMutations,
) -> bool {
    if !control.destroy() {
        return false;
    }
    pending.push(WorldMutation::DetachWheels { chassis });
    true
}

pub fn chassis_rotation_degrees(transform: &Transform) -> f32 {
    let (_, _, z) = transform.rotation.to_euler(EulerRot::XYZ);
    z.to_degrees()
}

#[derive(Debug, Clone, Default)]
pub struct RigVisuals {
    pub chassis_sprite: Option<Handle<Image>>,
    pub wheel_sprite: Option<Handle<Image>>,
}

/// Spawns the chassis, both wheels and their revolute joints. Returns the chassis entity.
pub fn spawn_vehicle_rig(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<ColorMaterial>,
    config: &GameConfig,
    plan: &RigPlan,
    spawn: Vec2,
    visuals: &RigVisuals,
) -> Entity {
    let chassis_cfg = &config.vehicle.chassis;
    let wheel_cfg = &config.vehicle.wheels;

    let parts = plan
        .chassis_triangles
        .iter()
        .map(|[a, b, c]| (Vec2::ZERO, 0.0, Collider::triangle(*a, *b, *c)))
        .collect::<Vec<_>>();

    let chassis = commands
        .spawn((
            Name::new("PlayerChassis"),
            LevelEntity,
            PlayerVehicle,
            BodyTag::Chassis,
            VehicleControl::default(),
            Transform::from_xyz(spawn.x, spawn.y, VEHICLE_Z),
            Visibility::Inherited,
        ))
        .insert((
            RigidBody::Dynamic,
            Collider::compound(parts),
            Friction::coefficient(chassis_cfg.friction),
            Restitution::coefficient(chassis_cfg.restitution),
            ColliderMassProperties::Density(chassis_cfg.density),
            Damping {
                linear_damping: 0.0,
                angular_damping: 0.0,
            },
            Velocity::zero(),
            ExternalForce::default(),
            ExternalImpulse::default(),
            ReadMassProperties::default(),
            ActiveEvents::COLLISION_EVENTS,
            Ccd::enabled(),
        ))
        .id();

    commands.entity(chassis).with_children(|parent| {
        match &visuals.chassis_sprite {
            Some(image) => {
                parent.spawn((
                    Name::new("PlayerChassisSprite"),
                    Sprite {
                        image: image.clone(),
                        custom_size: Some(plan.sprite_size),
                        ..default()
                    },
                    Transform::from_translation(plan.sprite_offset.extend(0.1)),
                ));
            }
            None => {
                let material = materials.add(ColorMaterial::from(Color::srgb(0.93, 0.34, 0.24)));
                for [a, b, c] in &plan.chassis_triangles {
                    parent.spawn((
                        Mesh2d(meshes.add(Triangle2d::new(*a, *b, *c))),
                        MeshMaterial2d(material.clone()),
                        Transform::from_xyz(0.0, 0.0, 0.1),
                    ));
                }
            }
        }
    });

    let wheel_material = materials.add(ColorMaterial::from(Color::srgb(0.16, 0.85, 0.95)));
    let hub_size = Vec2::new(plan.wheels[0].radius * 1.6, plan.wheels[0].radius * 0.25);
    let mut wheel_entities = [Entity::PLACEHOLDER; 2];

    for (slot, wheel) in plan.wheels.iter().enumerate() {
        let position = spawn + wheel.offset;
        let mut joint = RevoluteJointBuilder::new()
            .local_anchor1(wheel.offset)
            .local_anchor2(Vec2::ZERO)
            .build();
        joint.set_contacts_enabled(false);

        let name = match wheel.side {
            WheelSide::Front => "PlayerWheelFront",
            WheelSide::Rear => "PlayerWheelRear",
        };
        let wheel_entity = commands
            .spawn((
                Name::new(name),
                LevelEntity,
                BodyTag::Wheel,
                VehicleWheel {
                    side: wheel.side,
                    chassis,
                },
                Transform::from_xyz(position.x, position.y, WHEEL_Z),
                Visibility::Inherited,
            ))
            .insert((
                RigidBody::Dynamic,
                Collider::ball(wheel.radius),
                Friction::coefficient(wheel_cfg.friction),
                Restitution::coefficient(wheel_cfg.restitution),
                ColliderMassProperties::Density(wheel_cfg.density),
                Damping {
                    linear_damping: 0.0,
                    angular_damping: wheel_cfg.angular_damping,
                },
                Velocity::zero(),
                ExternalForce::default(),
                ActiveEvents::COLLISION_EVENTS,
                ImpulseJoint::new(chassis, joint),
            ))
            .with_children(|parent| match &visuals.wheel_sprite {
                Some(image) => {
                    parent.spawn(Sprite {
                        image: image.clone(),
                        custom_size: Some(Vec2::splat(wheel.radius * 2.0)),
                        ..default()
                    });
                }
                None => {
                    parent.spawn((
                        Mesh2d(meshes.add(Circle::new(wheel.radius))),
                        MeshMaterial2d(wheel_material.clone()),
                    ));
                    parent.spawn((
                        Sprite::from_color(Color::srgb(0.05, 0.10, 0.12), hub_size),
                        Transform::from_xyz(0.0, 0.0, 0.1),
                    ));
                }
            })
            .id();
        wheel_entities[slot] = wheel_entity;
    }

    commands.entity(chassis).insert(VehicleRig {
        front_wheel: wheel_entities[0],
        rear_wheel: wheel_entities[1],
        right_extent: plan.right_extent,
    });

    chassis
}

fn sync_input_bindings(config: Res<GameConfig>, mut bindings: ResMut<VehicleInputBindings>) {
    *bindings = VehicleInputBindings::from_config(&config);
}

fn read_vehicle_input(
    keyboard: Res<ButtonInput<KeyCode>>,
    bindings: Res<VehicleInputBindings>,
    session: Option<Res<LevelSession>>,
    mut input_state: ResMut<VehicleInputState>,
) {
    let playing = session.is_some_and(|session| session.phase() == LevelPhase::Playing);
    if !playing {
        *input_state = VehicleInputState::default();
        return;
    }

    input_state.forward = bindings.forward.iter().any(|key| keyboard.pressed(*key));
    input_state.backward = bindings.backward.iter().any(|key| keyboard.pressed(*key));
    input_state.jump_forward = bindings
        .jump_forward
        .iter()
        .any(|key| keyboard.just_pressed(*key));
    input_state.jump_backward = bindings
        .jump_backward
        .iter()
        .any(|key| keyboard.just_pressed(*key));
}

fn apply_wheel_torque(
    config: Res<GameConfig>,
    input_state: Res<VehicleInputState>,
    mut wheel_query: Query<(&Velocity, &mut ExternalForce), With<VehicleWheel>>,
) {
    let drive = &config.vehicle.drive;
    for (velocity, mut force) in &mut wheel_query {
        force.torque = wheel_torque(
            input_state.forward,
            input_state.backward,
            velocity.angvel,
            drive.wheel_torque,
            drive.max_wheel_angular_speed,
        );
    }
}

fn apply_jump_requests(
    config: Res<GameConfig>,
    input_state: Res<VehicleInputState>,
    mut chassis_query: Query<
        (
            &Transform,
            &ReadMassProperties,
            &mut ExternalImpulse,
            &mut VehicleControl,
        ),
        With<PlayerVehicle>,
    >,
) {
    let direction = if input_state.jump_forward {
        JumpDirection::Forward
    } else if input_state.jump_backward {
        JumpDirection::Backward
    } else {
        return;
    };

    let Ok((transform, mass, mut impulse, mut control)) = chassis_query.single_mut() else {
        return;
    };
    if control.is_destroyed() || !control.is_touching_ground() {
        return;
    }

    let drive = &config.vehicle.drive;
    let center_of_mass = transform
        .transform_point(mass.get().local_center_of_mass.extend(0.0))
        .truncate();
    let (linear, point) = jump_impulse(
        direction,
        drive.jump_strength,
        drive,
        config.game.physics.world_scale,
        center_of_mass,
    );

    *impulse = ExternalImpulse::at_point(linear, point, center_of_mass);
    control.begin_jump(drive.jump_wait_seconds);
    debug!("Vehicle jump {direction:?} with impulse {linear:?} at {point:?}.");
}

fn tick_vehicle_control(time: Res<Time>, mut control_query: Query<&mut VehicleControl>) {
    let delta = time.delta_secs();
    for mut control in &mut control_query {
        control.tick(delta);
    }
}

fn drain_pending_world_mutations(
    mut commands: Commands,
    mut pending: ResMut<PendingWorldMutations>,
    rig_query: Query<&VehicleRig>,
) {
    for mutation in pending.drain() {
        match mutation {
            WorldMutation::DetachWheels { chassis } => {
                let Ok(rig) = rig_query.get(chassis) else {
                    continue;
                };
                for wheel in [rig.front_wheel, rig.rear_wheel] {
                    if let Ok(mut wheel_commands) = commands.get_entity(wheel) {
                        wheel_commands.remove::<ImpulseJoint>();
                    }
                }
                info!("Vehicle destroyed; wheel joints removed.");
            }
        }
    }
}

fn clear_pending_world_mutations(mut pending: ResMut<PendingWorldMutations>) {
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::gameplay::level::geometry::AlphaMask;
    use bevy::ecs::system::RunSystemOnce;

    fn rover_plan() -> RigPlan {
        let config = sample_config();
        let mask = AlphaMask::from_fn(200, 90, |x, y| {
            let y_up = 89 - y;
            ((10..190).contains(&x) && (30..65).contains(&y_up))
                || ((60..140).contains(&x) && (65..90).contains(&y_up))
        });
        rig::plan_rig(&mask, &config.vehicle, 40.0).expect("rover traces")
    }

    fn spawn_rig(world: &mut World) -> Entity {
        let plan = rover_plan();
        world
            .run_system_once(
                move |mut commands: Commands,
                      mut meshes: ResMut<Assets<Mesh>>,
                      mut materials: ResMut<Assets<ColorMaterial>>| {
                    spawn_vehicle_rig(
                        &mut commands,
                        &mut meshes,
                        &mut materials,
                        &sample_config(),
                        &plan,
                        Vec2::new(3.0, 5.0),
                        &RigVisuals::default(),
                    )
                },
            )
            .expect("spawn system runs")
    }

    fn test_world() -> World {
        let mut world = World::new();
        world.init_resource::<Assets<Mesh>>();
        world.init_resource::<Assets<ColorMaterial>>();
        world
    }

    #[test]
    fn rig_spawns_one_chassis_two_wheels_two_joints() {
        let mut world = test_world();
        let chassis = spawn_rig(&mut world);

        let chassis_count = world
            .query_filtered::<Entity, With<PlayerVehicle>>()
            .iter(&world)
            .count();
        let wheel_count = world.query::<&VehicleWheel>().iter(&world).count();
        let joints: Vec<Entity> = world
            .query::<&ImpulseJoint>()
            .iter(&world)
            .map(|joint| joint.parent)
            .collect();

        assert_eq!(chassis_count, 1);
        assert_eq!(wheel_count, 2);
        assert_eq!(joints, vec![chassis, chassis]);
        let rig = world.get::<VehicleRig>(chassis).expect("rig component");
        assert_ne!(rig.front_wheel, rig.rear_wheel);
    }

    #[test]
    fn wheels_start_at_their_joint_anchors() {
        let mut world = test_world();
        spawn_rig(&mut world);

        let mut positions = world
            .query::<(&VehicleWheel, &Transform)>()
            .iter(&world)
            .map(|(wheel, transform)| (wheel.side, transform.translation.truncate()))
            .collect::<Vec<_>>();
        positions.sort_by(|a, b| a.1.x.total_cmp(&b.1.x));

        assert_eq!(positions[0].0, WheelSide::Rear);
        assert!(positions[0].1.distance(Vec2::new(3.0 - 1.7, 5.45)) < 1e-5);
        assert!(positions[1].1.distance(Vec2::new(3.0 + 1.55, 5.45)) < 1e-5);
    }

    #[test]
    fn destroy_queues_joint_removal_once() {
        let mut pending = PendingWorldMutations::default();
        let mut control = VehicleControl::default();
        let chassis = World::new().spawn_empty().id();

        assert!(destroy_vehicle(chassis, &mut control, &mut pending));
        assert!(!destroy_vehicle(chassis, &mut control, &mut pending));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn draining_detach_removes_both_joints() {
        let mut world = test_world();
        let chassis = spawn_rig(&mut world);
        let mut pending = PendingWorldMutations::default();
        pending.push(WorldMutation::DetachWheels { chassis });
        world.insert_resource(pending);

        world
            .run_system_once(drain_pending_world_mutations)
            .expect("drain system runs");

        assert_eq!(world.query::<&ImpulseJoint>().iter(&world).count(), 0);
        assert_eq!(world.resource::<PendingWorldMutations>().len(), 0);
    }

    #[test]
    fn rotation_reads_back_in_degrees() {
        let transform = Transform::from_rotation(Quat::from_rotation_z(std::f32::consts::PI));

        assert!((chassis_rotation_degrees(&transform).abs() - 180.0).abs() < 1e-3);
    }
}
