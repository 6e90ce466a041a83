use super::contact::BodyTag;
use super::geometry::{scale_to_world, triangulate, Triangle};
use super::map::{LevelMap, MapShape};
use super::LevelEntity;
use crate::config::GameConfig;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

const TERRAIN_Z: f32 = 0.0;
const FINISH_Z: f32 = -1.0;

#[derive(Debug, Clone, Copy)]
pub struct TerrainRules {
    pub world_scale: f32,
    pub restitution: f32,
    pub density: f32,
    pub polygon_friction: f32,
    pub rectangle_friction: f32,
    pub wall_width_px: f32,
    pub wall_gap_px: f32,
}

impl TerrainRules {
    pub fn from_config(config: &GameConfig) -> Self {
        let terrain = &config.game.terrain;
        Self {
            world_scale: config.game.physics.world_scale,
            restitution: terrain.restitution,
            density: terrain.density,
            polygon_friction: terrain.polygon_friction,
            rectangle_friction: terrain.rectangle_friction,
            wall_width_px: terrain.boundary_wall_width_px,
            wall_gap_px: terrain.boundary_wall_gap_px,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerrainShape {
    Box { center: Vec2, half_extents: Vec2 },
    Triangles(Vec<Triangle>),
}

impl TerrainShape {
    /// World-space axis-aligned bounds of every fixture in the shape.
    pub fn bounds(&self) -> Rect {
        match self {
            Self::Box {
                center,
                half_extents,
            } => Rect::from_center_half_size(*center, *half_extents),
            Self::Triangles(triangles) => {
                let mut bounds = Rect {
                    min: Vec2::splat(f32::INFINITY),
                    max: Vec2::splat(f32::NEG_INFINITY),
                };
                for point in triangles.iter().flatten() {
                    bounds.min = bounds.min.min(*point);
                    bounds.max = bounds.max.max(*point);
                }
                bounds
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainKind {
    Land,
    BoundaryWall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerrainFixture {
    pub kind: TerrainKind,
    pub shape: TerrainShape,
    pub friction: f32,
    pub restitution: f32,
    pub density: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinishSensor {
    pub center: Vec2,
    pub half_extents: Vec2,
}

#[derive(Debug, Clone)]
pub struct TerrainPlan {
    pub fixtures: Vec<TerrainFixture>,
    pub finish: FinishSensor,
    pub level_size: Vec2,
    pub skipped_polygons: usize,
}

pub fn rectangle_fixture(rect_px: Rect, rules: &TerrainRules) -> TerrainFixture {
    TerrainFixture {
        kind: TerrainKind::Land,
        shape: TerrainShape::Box {
            center: rect_px.center() / rules.world_scale,
            half_extents: rect_px.half_size() / rules.world_scale,
        },
        friction: rules.rectangle_friction,
        restitution: rules.restitution,
        density: rules.density,
    }
}

/// Returns `None` when every triangle of the polygon is degenerate.
pub fn polygon_fixture(points_px: &[Vec2], rules: &TerrainRules) -> Option<TerrainFixture> {
    let triangles = triangulate(&scale_to_world(points_px, rules.world_scale));
    if triangles.is_empty() {
        return None;
    }

    Some(TerrainFixture {
        kind: TerrainKind::Land,
        shape: TerrainShape::Triangles(triangles),
        friction: rules.polygon_friction,
        restitution: rules.restitution,
        density: rules.density,
    })
}

/// Invisible walls just outside the left and right edges of the level.
pub fn boundary_walls(level_size_px: Vec2, rules: &TerrainRules) -> [TerrainFixture; 2] {
    let left = Rect::new(
        -rules.wall_gap_px - rules.wall_width_px,
        0.0,
        -rules.wall_gap_px,
        level_size_px.y,
    );
    let right = Rect::new(
        level_size_px.x + rules.wall_gap_px,
        0.0,
        level_size_px.x + rules.wall_gap_px + rules.wall_width_px,
        level_size_px.y,
    );

    [left, right].map(|rect| TerrainFixture {
        kind: TerrainKind::BoundaryWall,
        ..rectangle_fixture(rect, rules)
    })
}

pub fn finish_sensor(rect_px: Rect, rules: &TerrainRules) -> FinishSensor {
    FinishSensor {
        center: rect_px.center() / rules.world_scale,
        half_extents: rect_px.half_size() / rules.world_scale,
    }
}

pub fn plan_terrain(map: &LevelMap, rules: &TerrainRules) -> TerrainPlan {
    let mut fixtures = Vec::with_capacity(map.land.len() + 2);
    let mut skipped_polygons = 0;

    for shape in &map.land {
        match shape {
            MapShape::Rectangle(rect) => fixtures.push(rectangle_fixture(*rect, rules)),
            MapShape::Polygon(points) => match polygon_fixture(points, rules) {
                Some(fixture) => fixtures.push(fixture),
                None => skipped_polygons += 1,
            },
        }
    }
    fixtures.extend(boundary_walls(map.size_px(), rules));

    TerrainPlan {
        fixtures,
        finish: finish_sensor(map.finish, rules),
        level_size: map.size_px() / rules.world_scale,
        skipped_polygons,
    }
}

pub fn spawn_terrain(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<ColorMaterial>,
    plan: &TerrainPlan,
) {
    let land_material = materials.add(ColorMaterial::from(Color::srgb(0.05, 0.55, 0.70)));
    let land_color = Color::srgb(0.05, 0.55, 0.70);

    for (index, fixture) in plan.fixtures.iter().enumerate() {
        let material = (
            Friction::coefficient(fixture.friction),
            Restitution::coefficient(fixture.restitution),
            ColliderMassProperties::Density(fixture.density),
        );

        match (&fixture.shape, fixture.kind) {
            (TerrainShape::Box { center, half_extents }, TerrainKind::BoundaryWall) => {
                commands.spawn((
                    Name::new(format!("BoundaryWall{index}")),
                    LevelEntity,
                    BodyTag::Boundary,
                    RigidBody::Fixed,
                    Collider::cuboid(half_extents.x, half_extents.y),
                    material,
                    Transform::from_xyz(center.x, center.y, TERRAIN_Z),
                ));
            }
            (TerrainShape::Box { center, half_extents }, TerrainKind::Land) => {
                commands.spawn((
                    Name::new(format!("LandBox{index}")),
                    LevelEntity,
                    BodyTag::Land,
                    RigidBody::Fixed,
                    Collider::cuboid(half_extents.x, half_extents.y),
                    material,
                    Sprite::from_color(land_color, *half_extents * 2.0),
                    Transform::from_xyz(center.x, center.y, TERRAIN_Z),
                ));
            }
            (TerrainShape::Triangles(triangles), kind) => {
                let parts = triangles
                    .iter()
                    .map(|[a, b, c]| (Vec2::ZERO, 0.0, Collider::triangle(*a, *b, *c)))
                    .collect::<Vec<_>>();
                let tag = match kind {
                    TerrainKind::Land => BodyTag::Land,
                    TerrainKind::BoundaryWall => BodyTag::Boundary,
                };

                commands
                    .spawn((
                        Name::new(format!("LandPolygon{index}")),
                        LevelEntity,
                        tag,
                        RigidBody::Fixed,
                        Collider::compound(parts),
                        material,
                        Transform::from_xyz(0.0, 0.0, TERRAIN_Z),
                        Visibility::Inherited,
                    ))
                    .with_children(|parent| {
                        for [a, b, c] in triangles {
                            parent.spawn((
                                Mesh2d(meshes.add(Triangle2d::new(*a, *b, *c))),
                                MeshMaterial2d(land_material.clone()),
                                Transform::default(),
                            ));
                        }
                    });
            }
        }
    }

    let finish = plan.finish;
    commands.spawn((
        Name::new("FinishTrigger"),
        LevelEntity,
        BodyTag::Finish,
        RigidBody::Fixed,
        Collider::cuboid(finish.half_extents.x, finish.half_extents.y),
        Sensor,
        ActiveEvents::COLLISION_EVENTS,
        Sprite::from_color(
            Color::srgba(1.0, 0.55, 0.10, 0.35),
            finish.half_extents * 2.0,
        ),
        Transform::from_xyz(finish.center.x, finish.center.y, FINISH_Z),
    ));
}
