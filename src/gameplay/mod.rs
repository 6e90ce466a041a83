pub mod level;
pub mod sfx;
pub mod vehicle;

use bevy::prelude::*;
use level::LevelPlugin;
use sfx::SfxPlugin;
use vehicle::VehicleGameplayPlugin;

pub struct GameplayPlugin;

impl Plugin for GameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(LevelPlugin)
            .add_plugins(VehicleGameplayPlugin)
            .add_plugins(SfxPlugin);
    }
}
