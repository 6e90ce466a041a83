use crate::config::GameConfig;
use bevy::asset::LoadState;
use bevy::prelude::*;
use std::collections::HashMap;
use std::path::Path;

pub const ASSET_ROOT_DIR: &str = "assets";

pub struct AssetRegistryPlugin;

impl Plugin for AssetRegistryPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            PreUpdate,
            sync_asset_registry.run_if(resource_exists::<GameConfig>),
        );
    }
}

fn sync_asset_registry(
    mut commands: Commands,
    config: Res<GameConfig>,
    asset_server: Res<AssetServer>,
    registry: Option<ResMut<AssetRegistry>>,
) {
    if registry.is_some() && !config.is_changed() {
        return;
    }

    let new_registry =
        AssetRegistry::from_config(&config, &asset_server, Path::new(ASSET_ROOT_DIR));

    match registry {
        Some(mut existing_registry) => {
            *existing_registry = new_registry;
            log_asset_registry_summary("Updated", &existing_registry);
        }
        None => {
            log_asset_registry_summary("Initialized", &new_registry);
            commands.insert_resource(new_registry);
        }
    }
}

fn log_asset_registry_summary(prefix: &str, registry: &AssetRegistry) {
    info!(
        "{prefix} asset registry: sprites {}/{}, audio {}/{}.",
        available_count(&registry.sprites),
        registry.sprites.len(),
        available_count(&registry.audio),
        registry.audio.len(),
    );
    for (id, entry) in &registry.sprites {
        if entry.handle.is_none() {
            warn!("Sprite `{id}` is missing on disk at `{}`.", entry.path);
        }
    }
}

/// A configured asset id, loaded only when its file is present.
#[derive(Debug, Clone)]
pub struct RegisteredAsset<A: Asset> {
    pub path: String,
    pub handle: Option<Handle<A>>,
}

impl<A: Asset> RegisteredAsset<A> {
    fn load(path: &str, asset_server: &AssetServer, asset_root: &Path) -> Self {
        let handle = asset_exists(asset_root, path).then(|| asset_server.load(path.to_string()));
        Self {
            path: path.to_string(),
            handle,
        }
    }
}

fn available_count<A: Asset>(entries: &HashMap<String, RegisteredAsset<A>>) -> usize {
    entries.values().filter(|entry| entry.handle.is_some()).count()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: usize,
    pub failed: usize,
    pub pending: usize,
}

impl LoadProgress {
    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct AssetRegistry {
    pub sprites: HashMap<String, RegisteredAsset<Image>>,
    pub audio: HashMap<String, RegisteredAsset<AudioSource>>,
}

impl AssetRegistry {
    pub fn from_config(config: &GameConfig, asset_server: &AssetServer, asset_root: &Path) -> Self {
        let sprites = config
            .assets
            .sprites
            .iter()
            .map(|entry| {
                (
                    entry.id.clone(),
                    RegisteredAsset::load(&entry.path, asset_server, asset_root),
                )
            })
            .collect();
        let audio = config
            .assets
            .audio
            .iter()
            .map(|entry| {
                (
                    entry.id.clone(),
                    RegisteredAsset::load(&entry.path, asset_server, asset_root),
                )
            })
            .collect();

        Self { sprites, audio }
    }

    pub fn sprite_handle(&self, id: &str) -> Option<Handle<Image>> {
        self.sprites.get(id).and_then(|entry| entry.handle.clone())
    }

    pub fn audio_handle(&self, id: &str) -> Option<Handle<AudioSource>> {
        self.audio.get(id).and_then(|entry| entry.handle.clone())
    }

    /// Load state of every sprite that exists on disk. The loading screen waits on this.
    pub fn sprite_load_progress(&self, asset_server: &AssetServer) -> LoadProgress {
        let mut progress = LoadProgress::default();
        for handle in self.sprites.values().filter_map(|entry| entry.handle.as_ref()) {
            match asset_server.load_state(handle.id()) {
                LoadState::Failed(_) => progress.failed += 1,
                _ if asset_server.is_loaded_with_dependencies(handle.id()) => progress.loaded += 1,
                _ => progress.pending += 1,
            }
        }
        progress
    }
}

pub fn asset_exists(asset_root: &Path, path: &str) -> bool {
    let file_path = path.split('#').next().unwrap_or(path);
    asset_root.join(file_path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_paths_check_the_underlying_file() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join(ASSET_ROOT_DIR);

        assert!(asset_exists(&root, "sprites/rover_model.png"));
        assert!(asset_exists(&root, "sprites/rover_model.png#Image0"));
        assert!(!asset_exists(&root, "sprites/not_there.png"));
    }

    #[test]
    fn every_shipped_level_map_is_on_disk() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join(ASSET_ROOT_DIR);

        for level_id in 1..=16 {
            assert!(
                asset_exists(&root, &format!("maps/level{level_id}.json")),
                "level {level_id} map missing"
            );
        }
    }

    #[test]
    fn settled_means_nothing_pending() {
        let progress = LoadProgress {
            loaded: 1,
            failed: 1,
            pending: 0,
        };
        assert!(progress.is_settled());
        assert!(!LoadProgress {
            pending: 1,
            ..progress
        }
        .is_settled());
    }
}
