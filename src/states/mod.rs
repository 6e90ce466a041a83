use crate::assets::AssetRegistry;
use crate::config::GameConfig;
use crate::gameplay::level::LevelLoadRequest;
use crate::gameplay::sfx::{AudioCommand, MusicDeck, AUDIO_ID_CLICK};
use crate::session::progress::FIRST_LEVEL_ID;
use crate::session::{level_request, SessionServices, SessionState};
use crate::ui::format_level_time;
use bevy::app::AppExit;
use bevy::prelude::*;
use bevy::window::PrimaryWindow;

const MIN_LOADING_SCREEN_SECONDS: f64 = 0.75;
const LEVELS_PER_ROW: u32 = 4;
const SCREEN_BG: Color = Color::srgba(0.01, 0.02, 0.04, 0.96);
const PANEL_BG: Color = Color::srgba(0.03, 0.07, 0.10, 0.96);
const PANEL_BORDER: Color = Color::srgba(0.10, 0.85, 0.95, 0.85);
const TEXT_PRIMARY: Color = Color::srgb(0.88, 0.98, 1.0);
const TEXT_MUTED: Color = Color::srgb(0.45, 0.55, 0.60);
const TEXT_SELECTED: Color = Color::srgb(1.0, 0.62, 0.15);

#[derive(States, Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GameState {
    #[default]
    Boot,
    Loading,
    LevelSelect,
    InLevel,
    GameCompleted,
}

pub struct GameStatePlugin;

impl Plugin for GameStatePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, (setup_camera, apply_window_title))
            .add_systems(OnEnter(GameState::Boot), enter_boot)
            .add_systems(Update, boot_to_loading.run_if(in_state(GameState::Boot)))
            .add_systems(OnEnter(GameState::Loading), enter_loading)
            .add_systems(OnExit(GameState::Loading), cleanup_screen::<LoadingScreenRoot>)
            .add_systems(
                Update,
                loading_to_level_select.run_if(in_state(GameState::Loading)),
            )
            .add_systems(
                OnEnter(GameState::LevelSelect),
                (start_menu_music, spawn_level_select_screen),
            )
            .add_systems(
                OnExit(GameState::LevelSelect),
                cleanup_screen::<LevelSelectRoot>,
            )
            .add_systems(
                Update,
                (level_select_controls, refresh_level_select_screen)
                    .chain()
                    .run_if(in_state(GameState::LevelSelect))
                    .run_if(resource_exists::<SessionServices>),
            )
            .add_systems(
                OnEnter(GameState::GameCompleted),
                (start_menu_music, spawn_game_completed_screen),
            )
            .add_systems(
                OnExit(GameState::GameCompleted),
                cleanup_screen::<GameCompletedRoot>,
            )
            .add_systems(
                Update,
                game_completed_controls.run_if(in_state(GameState::GameCompleted)),
            );
    }
}

#[derive(Component)]
struct LoadingScreenRoot;

#[derive(Component)]
struct LevelSelectRoot;

#[derive(Component)]
struct GameCompletedRoot;

#[derive(Component, Debug, Clone, Copy)]
struct LevelTile {
    level_id: u32,
}

#[derive(Component)]
struct TotalTimeText;

#[derive(Resource, Debug, Clone, Copy)]
struct LoadingScreenState {
    entered_at_s: f64,
}

/// What a level tile shows in the list.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTileView {
    pub label: String,
    pub locked: bool,
}

pub fn level_tile_view(level_id: u32, unlocked_through: u32, best: Option<f32>) -> LevelTileView {
    let locked = level_id > unlocked_through;
    let time = match (locked, best) {
        (true, _) => "locked".to_string(),
        (false, Some(best)) => format_level_time(best),
        (false, None) => "--.--".to_string(),
    };
    LevelTileView {
        label: format!("{level_id:>2}\n{time}"),
        locked,
    }
}

/// Moves the list selection with arrow keys, staying inside `1..=level_count`.
pub fn step_selection(selected: u32, dx: i32, dy: i32, level_count: u32) -> u32 {
    let offset = dx + dy * LEVELS_PER_ROW as i32;
    let target = selected as i64 + offset as i64;
    target.clamp(FIRST_LEVEL_ID as i64, level_count.max(FIRST_LEVEL_ID) as i64) as u32
}

fn setup_camera(mut commands: Commands) {
    commands.spawn(Camera2d);
}

fn apply_window_title(
    config: Res<GameConfig>,
    mut window_query: Query<&mut Window, With<PrimaryWindow>>,
) {
    if let Ok(mut window) = window_query.single_mut() {
        window.title = config.game.app.window_title.clone();
    }
}

fn enter_boot() {
    info!("Entered state: Boot");
}

fn boot_to_loading(mut next_state: ResMut<NextState<GameState>>) {
    next_state.set(GameState::Loading);
}

fn enter_loading(mut commands: Commands, time: Res<Time>) {
    info!("Entered state: Loading");
    commands.insert_resource(LoadingScreenState {
        entered_at_s: time.elapsed_secs_f64(),
    });

    commands
        .spawn((
            Name::new("LoadingScreen"),
            LoadingScreenRoot,
            screen_node(),
            BackgroundColor(SCREEN_BG),
            ZIndex(300),
        ))
        .with_children(|parent| {
            parent.spawn(screen_text("TRON FG", 64.0, PANEL_BORDER));
            parent.spawn(screen_text("loading...", 22.0, TEXT_MUTED));
        });
}

fn loading_to_level_select(
    time: Res<Time>,
    asset_server: Res<AssetServer>,
    loading_state: Option<Res<LoadingScreenState>>,
    registry: Option<Res<AssetRegistry>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    let (Some(loading_state), Some(registry)) = (loading_state, registry) else {
        return;
    };

    let has_min_time =
        time.elapsed_secs_f64() - loading_state.entered_at_s >= MIN_LOADING_SCREEN_SECONDS;
    if !has_min_time {
        return;
    }

    let progress = registry.sprite_load_progress(&asset_server);
    if !progress.is_settled() {
        return;
    }
    if progress.failed > 0 {
        warn!(
            "{} sprite(s) failed to load, continuing to level list.",
            progress.failed
        );
    }

    next_state.set(GameState::LevelSelect);
}

fn start_menu_music(config: Res<GameConfig>, mut audio: MessageWriter<AudioCommand>) {
    audio.write(AudioCommand::music(&config.levels.music.menu, true));
}

fn spawn_level_select_screen(mut commands: Commands, config: Res<GameConfig>) {
    info!("Entered state: LevelSelect");
    let level_count = config.level_count();

    commands
        .spawn((
            Name::new("LevelSelectScreen"),
            LevelSelectRoot,
            screen_node(),
            BackgroundColor(SCREEN_BG),
            ZIndex(300),
        ))
        .with_children(|parent| {
            parent.spawn(screen_text("SELECT LEVEL", 48.0, TEXT_PRIMARY));
            parent
                .spawn((
                    Node {
                        display: Display::Grid,
                        grid_template_columns: RepeatedGridTrack::flex(LEVELS_PER_ROW as u16, 1.0),
                        column_gap: Val::Px(10.0),
                        row_gap: Val::Px(10.0),
                        padding: UiRect::all(Val::Px(16.0)),
                        border: UiRect::all(Val::Px(1.0)),
                        ..default()
                    },
                    BackgroundColor(PANEL_BG),
                    BorderColor::all(PANEL_BORDER),
                ))
                .with_children(|grid| {
                    for level_id in FIRST_LEVEL_ID..=level_count {
                        grid.spawn((
                            LevelTile { level_id },
                            Node {
                                width: Val::Px(120.0),
                                padding: UiRect::all(Val::Px(8.0)),
                                border: UiRect::all(Val::Px(2.0)),
                                justify_content: JustifyContent::Center,
                                ..default()
                            },
                            BorderColor::all(TEXT_MUTED),
                            Text::new(""),
                            TextFont {
                                font_size: 22.0,
                                ..default()
                            },
                            TextColor(TEXT_PRIMARY),
                        ));
                    }
                });
            parent.spawn((TotalTimeText, screen_text("", 22.0, TEXT_PRIMARY)));
            parent.spawn(screen_text(
                "Arrows - Select   Enter - Play   Esc - Quit",
                18.0,
                TEXT_MUTED,
            ));
        });
}

#[allow(clippy::too_many_arguments)]
fn level_select_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    config: Res<GameConfig>,
    services: Res<SessionServices>,
    mut session_state: ResMut<SessionState>,
    mut deck: ResMut<MusicDeck>,
    mut load_requests: MessageWriter<LevelLoadRequest>,
    mut audio: MessageWriter<AudioCommand>,
    mut exit: MessageWriter<AppExit>,
) {
    if keyboard.just_pressed(KeyCode::Escape) {
        info!("Quit requested from level list.");
        exit.write(AppExit::Success);
        return;
    }

    let dx = keyboard.just_pressed(KeyCode::ArrowRight) as i32
        - keyboard.just_pressed(KeyCode::ArrowLeft) as i32;
    let dy = keyboard.just_pressed(KeyCode::ArrowDown) as i32
        - keyboard.just_pressed(KeyCode::ArrowUp) as i32;
    if dx != 0 || dy != 0 {
        session_state.selected_level =
            step_selection(session_state.selected_level, dx, dy, config.level_count());
    }

    if keyboard.any_just_pressed([KeyCode::Enter, KeyCode::Space]) {
        let level_id = session_state.selected_level;
        if !services.is_unlocked(level_id) {
            debug!("Level {level_id} is locked.");
            return;
        }
        audio.write(AudioCommand::sound(AUDIO_ID_CLICK));
        load_requests.write(level_request(&config, &mut deck, level_id));
    }
}

fn refresh_level_select_screen(
    services: Res<SessionServices>,
    session_state: Res<SessionState>,
    mut tile_query: Query<(&LevelTile, &mut Text, &mut TextColor, &mut BorderColor)>,
    mut total_query: Query<&mut Text, (With<TotalTimeText>, Without<LevelTile>)>,
) {
    let unlocked_through = services.progress.unlock_progress();
    for (tile, mut text, mut color, mut border) in &mut tile_query {
        let view = level_tile_view(
            tile.level_id,
            unlocked_through,
            services.progress.level_best_time(tile.level_id),
        );
        if text.0 != view.label {
            text.0 = view.label;
        }

        let selected = tile.level_id == session_state.selected_level;
        color.0 = if view.locked { TEXT_MUTED } else { TEXT_PRIMARY };
        *border = BorderColor::all(if selected { TEXT_SELECTED } else { TEXT_MUTED });
    }

    if let Ok(mut text) = total_query.single_mut() {
        let total = format!("TOTAL {}", format_level_time(services.progress.total_time()));
        if text.0 != total {
            text.0 = total;
        }
    }
}

fn spawn_game_completed_screen(mut commands: Commands, services: Option<Res<SessionServices>>) {
    info!("Entered state: GameCompleted");
    let total = services
        .map(|services| services.progress.total_time())
        .unwrap_or(0.0);

    commands
        .spawn((
            Name::new("GameCompletedScreen"),
            GameCompletedRoot,
            screen_node(),
            BackgroundColor(SCREEN_BG),
            ZIndex(300),
        ))
        .with_children(|parent| {
            parent.spawn(screen_text("ALL LEVELS COMPLETE", 52.0, TEXT_SELECTED));
            parent.spawn(screen_text(
                &format!("Total time {}", format_level_time(total)),
                26.0,
                TEXT_PRIMARY,
            ));
            parent.spawn(screen_text("Enter - Level list", 18.0, TEXT_MUTED));
        });
}

fn game_completed_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut audio: MessageWriter<AudioCommand>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if keyboard.any_just_pressed([KeyCode::Enter, KeyCode::Space, KeyCode::Escape]) {
        audio.write(AudioCommand::sound(AUDIO_ID_CLICK));
        next_state.set(GameState::LevelSelect);
    }
}

fn cleanup_screen<T: Component>(mut commands: Commands, root_query: Query<Entity, With<T>>) {
    for entity in &root_query {
        commands.entity(entity).try_despawn();
    }
    commands.remove_resource::<LoadingScreenState>();
}

fn screen_node() -> Node {
    Node {
        width: Val::Percent(100.0),
        height: Val::Percent(100.0),
        flex_direction: FlexDirection::Column,
        justify_content: JustifyContent::Center,
        align_items: AlignItems::Center,
        row_gap: Val::Px(18.0),
        ..default()
    }
}

fn screen_text(text: &str, font_size: f32, color: Color) -> impl Bundle {
    (
        Text::new(text),
        TextFont {
            font_size,
            ..default()
        },
        TextColor(color),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_above_progress_are_locked() {
        let open = level_tile_view(2, 3, Some(41.5));
        let untried = level_tile_view(3, 3, None);
        let locked = level_tile_view(4, 3, Some(12.0));

        assert!(!open.locked);
        assert!(open.label.contains("41.50"));
        assert!(untried.label.contains("--.--"));
        assert!(locked.locked);
        assert!(locked.label.contains("locked"));
    }

    #[test]
    fn selection_moves_by_rows_and_stays_in_range() {
        assert_eq!(step_selection(1, 1, 0, 16), 2);
        assert_eq!(step_selection(2, 0, 1, 16), 6);
        assert_eq!(step_selection(1, -1, 0, 16), 1);
        assert_eq!(step_selection(15, 0, 1, 16), 16);
        assert_eq!(step_selection(3, 0, -1, 16), 1);
    }
}
