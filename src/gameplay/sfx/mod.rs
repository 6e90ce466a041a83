use crate::assets::AssetRegistry;
use bevy::audio::{AudioPlayer, AudioSink, AudioSinkPlayback, AudioSource, PlaybackSettings, Volume};
use bevy::prelude::*;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub const AUDIO_ID_CLICK: &str = "click";
pub const AUDIO_ID_CRASH: &str = "crash";
pub const AUDIO_ID_LEVEL_COMPLETED: &str = "level_completed";

const MUSIC_VOLUME: f32 = 0.7;
const SOUND_VOLUME: f32 = 1.0;

pub struct SfxPlugin;

impl Plugin for SfxPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<AudioCommand>()
            .init_resource::<MusicDeck>()
            .init_resource::<SfxMissingAssetWarnings>()
            .add_systems(Startup, seed_music_deck)
            .add_systems(
                PostUpdate,
                (sync_music_deck, apply_audio_commands).chain(),
            );
    }
}

#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub enum AudioCommand {
    PlaySound(String),
    PlayMusic { id: String, looped: bool },
    StopMusic,
    PauseMusic,
    ResumeMusic,
}

impl AudioCommand {
    pub fn sound(id: &str) -> Self {
        Self::PlaySound(id.to_string())
    }

    pub fn music(id: &str, looped: bool) -> Self {
        Self::PlayMusic {
            id: id.to_string(),
            looped,
        }
    }
}

#[derive(Component)]
struct MusicTrackAudio;

#[derive(Component)]
struct SoundCueAudio;

/// What the music channel is doing, plus the rng used to pick gameplay tracks.
#[derive(Resource, Debug, Clone)]
pub struct MusicDeck {
    current: Option<String>,
    looped: bool,
    paused: bool,
    last_gameplay_track: Option<String>,
    seed: u64,
}

impl Default for MusicDeck {
    fn default() -> Self {
        Self {
            current: None,
            looped: false,
            paused: false,
            last_gameplay_track: None,
            seed: 0x7C5E_A48B_D113_90F2,
        }
    }
}

impl MusicDeck {
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some() && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.current.is_some() && self.paused
    }

    /// Picks a gameplay track at random, never the one used for the previous level
    /// unless it is the only choice.
    pub fn next_gameplay_track(&mut self, tracks: &[String]) -> Option<String> {
        let roll = next_unit_random(&mut self.seed);
        let track = pick_track_avoiding(tracks, self.last_gameplay_track.as_deref(), roll)?.clone();
        self.last_gameplay_track = Some(track.clone());
        Some(track)
    }

    fn start(&mut self, id: &str, looped: bool) {
        self.current = Some(id.to_string());
        self.looped = looped;
        self.paused = false;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
    }
}

pub fn pick_track_avoiding<'a>(
    tracks: &'a [String],
    previous: Option<&str>,
    roll: f32,
) -> Option<&'a String> {
    let fresh: Vec<&String> = tracks
        .iter()
        .filter(|track| Some(track.as_str()) != previous)
        .collect();
    let pool = if fresh.is_empty() {
        tracks.iter().collect::<Vec<_>>()
    } else {
        fresh
    };
    if pool.is_empty() {
        return None;
    }

    let index = ((roll.clamp(0.0, 1.0) * pool.len() as f32) as usize).min(pool.len() - 1);
    Some(pool[index])
}

#[derive(Resource, Debug, Default)]
struct SfxMissingAssetWarnings {
    missing_ids: HashSet<String>,
}

fn seed_music_deck(mut deck: ResMut<MusicDeck>) {
    deck.seed ^= unix_timestamp_seconds();
}

/// One-shot tracks despawn themselves when they end.
fn sync_music_deck(mut deck: ResMut<MusicDeck>, music_query: Query<(), With<MusicTrackAudio>>) {
    if deck.current.is_some() && !deck.looped && music_query.is_empty() {
        deck.stop();
    }
}

fn apply_audio_commands(
    mut commands: Commands,
    mut audio_commands: MessageReader<AudioCommand>,
    registry: Option<Res<AssetRegistry>>,
    mut deck: ResMut<MusicDeck>,
    mut warnings: ResMut<SfxMissingAssetWarnings>,
    music_query: Query<(Entity, Option<&AudioSink>), With<MusicTrackAudio>>,
) {
    for command in audio_commands.read() {
        match command {
            AudioCommand::PlaySound(id) => {
                let Some(handle) = resolve_audio_handle(id, registry.as_deref(), &mut warnings)
                else {
                    continue;
                };
                commands.spawn((
                    Name::new(format!("SoundCue:{id}")),
                    SoundCueAudio,
                    AudioPlayer::<AudioSource>::new(handle),
                    PlaybackSettings::DESPAWN.with_volume(Volume::Linear(SOUND_VOLUME)),
                ));
            }
            AudioCommand::PlayMusic { id, looped } => {
                if deck.is_playing() && deck.current() == Some(id.as_str()) {
                    continue;
                }
                for (entity, _) in &music_query {
                    commands.entity(entity).try_despawn();
                }
                deck.stop();

                let Some(handle) = resolve_audio_handle(id, registry.as_deref(), &mut warnings)
                else {
                    continue;
                };
                let settings = if *looped {
                    PlaybackSettings::LOOP
                } else {
                    PlaybackSettings::DESPAWN
                };
                commands.spawn((
                    Name::new(format!("MusicTrack:{id}")),
                    MusicTrackAudio,
                    AudioPlayer::<AudioSource>::new(handle),
                    settings.with_volume(Volume::Linear(MUSIC_VOLUME)),
                ));
                deck.start(id, *looped);
                debug!("Music `{id}` started (looped: {looped}).");
            }
            AudioCommand::StopMusic => {
                for (entity, _) in &music_query {
                    commands.entity(entity).try_despawn();
                }
                deck.stop();
            }
            AudioCommand::PauseMusic => {
                for (_, sink) in &music_query {
                    if let Some(sink) = sink {
                        sink.pause();
                    }
                }
                if deck.current.is_some() {
                    deck.paused = true;
                }
            }
            AudioCommand::ResumeMusic => {
                for (_, sink) in &music_query {
                    if let Some(sink) = sink {
                        sink.play();
                    }
                }
                deck.paused = false;
            }
        }
    }
}

fn resolve_audio_handle(
    audio_id: &str,
    registry: Option<&AssetRegistry>,
    warnings: &mut SfxMissingAssetWarnings,
) -> Option<Handle<AudioSource>> {
    if let Some(handle) = registry.and_then(|registry| registry.audio_handle(audio_id)) {
        return Some(handle);
    }

    if warnings.missing_ids.insert(audio_id.to_string()) {
        warn!("Audio `{audio_id}` is not available; skipping playback.");
    }
    None
}

fn next_unit_random(seed: &mut u64) -> f32 {
    *seed = seed
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    ((*seed >> 32) as u32) as f32 / u32::MAX as f32
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
