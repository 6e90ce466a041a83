use crate::gameplay::level::lifecycle::{FailReason, LevelPhase, LevelSession, LevelSignal};
use crate::session::{CompletionRecord, SessionState};
use crate::states::GameState;
use bevy::prelude::*;

const HUD_PANEL_Z_INDEX: i32 = 190;
const OVERLAY_Z_INDEX: i32 = 300;
const HUD_PANEL_BG: Color = Color::srgba(0.02, 0.05, 0.08, 0.82);
const HUD_PANEL_BORDER: Color = Color::srgba(0.10, 0.85, 0.95, 0.85);
const HUD_TEXT_PRIMARY: Color = Color::srgb(0.88, 0.98, 1.0);
const HUD_TEXT_WARNING: Color = Color::srgb(1.0, 0.45, 0.25);

pub struct GameHudPlugin;

impl Plugin for GameHudPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<HudFailState>()
            .add_systems(OnEnter(GameState::InLevel), (reset_hud_fail_state, spawn_game_hud))
            .add_systems(OnExit(GameState::InLevel), cleanup_game_hud)
            .add_systems(
                Update,
                (track_level_failures, update_game_hud, update_level_overlay)
                    .chain()
                    .run_if(in_state(GameState::InLevel)),
            );
    }
}

#[derive(Component)]
struct GameHudRoot;

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
enum HudTextKind {
    Level,
    Timer,
    UpsideDown,
}

#[derive(Component)]
struct LevelOverlayRoot;

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
enum OverlayTextKind {
    Title,
    Body,
}

#[derive(Resource, Debug, Clone, Copy, Default)]
struct HudFailState {
    reason: Option<FailReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayContent {
    pub title: String,
    pub body: String,
}

pub fn format_level_time(seconds: f32) -> String {
    format!("{:.2}", seconds.max(0.0))
}

/// Overlay for the current phase, or `None` while the level is being played.
pub fn overlay_content(
    session: &LevelSession,
    completion: Option<&CompletionRecord>,
    fail_reason: Option<FailReason>,
) -> Option<OverlayContent> {
    let content = match session.phase() {
        LevelPhase::Loading => OverlayContent {
            title: "LOADING...".to_string(),
            body: format!("Level {}", session.level_id()),
        },
        LevelPhase::Playing if session.pause_overlay_visible() => OverlayContent {
            title: "PAUSED".to_string(),
            body: "Resuming...".to_string(),
        },
        LevelPhase::Playing => return None,
        LevelPhase::Paused => OverlayContent {
            title: "PAUSED".to_string(),
            body: "Esc / P - Resume\nR - Restart\nQ - Quit to level list".to_string(),
        },
        LevelPhase::Completed => {
            let record = completion.filter(|record| record.level_id == session.level_id());
            let best_line = match record.and_then(|record| record.best_seconds) {
                Some(best) if record.is_some_and(|record| record.new_best) => {
                    format!("NEW BEST {}", format_level_time(best))
                }
                Some(best) => format!("Best {}", format_level_time(best)),
                None => String::new(),
            };
            OverlayContent {
                title: "LEVEL COMPLETE".to_string(),
                body: format!(
                    "Time {}\n{best_line}\n\nEnter - Next level\nR - Restart\nQ - Level list",
                    format_level_time(session.level_timer())
                ),
            }
        }
        LevelPhase::Failed => {
            let title = match fail_reason {
                Some(FailReason::FellOut) => "FELL OFF THE WORLD",
                _ => "CRASHED",
            };
            OverlayContent {
                title: title.to_string(),
                body: "Enter / R - Retry\nQ - Level list".to_string(),
            }
        }
    };
    Some(content)
}

fn reset_hud_fail_state(mut state: ResMut<HudFailState>) {
    *state = HudFailState::default();
}

fn track_level_failures(mut signals: MessageReader<LevelSignal>, mut state: ResMut<HudFailState>) {
    for signal in signals.read() {
        match signal {
            LevelSignal::Failed { reason, .. } => state.reason = Some(*reason),
            LevelSignal::Restart { .. } | LevelSignal::Next { .. } => state.reason = None,
            _ => {}
        }
    }
}

fn hud_text(kind: HudTextKind, text: &str, font_size: f32, color: Color) -> impl Bundle {
    (
        kind,
        Text::new(text),
        TextFont {
            font_size,
            ..default()
        },
        TextColor(color),
    )
}

fn spawn_game_hud(mut commands: Commands, existing_hud: Query<Entity, With<GameHudRoot>>) {
    if !existing_hud.is_empty() {
        return;
    }

    commands
        .spawn((
            Name::new("GameHudRoot"),
            GameHudRoot,
            Node {
                position_type: PositionType::Absolute,
                left: Val::Px(12.0),
                right: Val::Px(12.0),
                top: Val::Px(10.0),
                justify_content: JustifyContent::SpaceBetween,
                align_items: AlignItems::FlexStart,
                ..default()
            },
            ZIndex(HUD_PANEL_Z_INDEX),
        ))
        .with_children(|root| {
            root.spawn((
                Name::new("GameHudPanel"),
                Node {
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(4.0),
                    padding: UiRect::all(Val::Px(10.0)),
                    border: UiRect::all(Val::Px(1.0)),
                    ..default()
                },
                BackgroundColor(HUD_PANEL_BG),
                BorderColor::all(HUD_PANEL_BORDER),
            ))
            .with_children(|panel| {
                panel.spawn(hud_text(HudTextKind::Level, "LEVEL", 22.0, HUD_TEXT_PRIMARY));
                panel.spawn(hud_text(HudTextKind::Timer, "0.00", 30.0, HUD_TEXT_PRIMARY));
            });
            root.spawn(hud_text(HudTextKind::UpsideDown, "", 28.0, HUD_TEXT_WARNING));
        });

    commands
        .spawn((
            Name::new("LevelOverlay"),
            GameHudRoot,
            LevelOverlayRoot,
            Node {
                position_type: PositionType::Absolute,
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                justify_content: JustifyContent::Center,
                align_items: AlignItems::Center,
                ..default()
            },
            BackgroundColor(Color::srgba(0.0, 0.01, 0.02, 0.72)),
            Visibility::Hidden,
            ZIndex(OVERLAY_Z_INDEX),
        ))
        .with_children(|parent| {
            parent
                .spawn((
                    Node {
                        min_width: Val::Px(420.0),
                        flex_direction: FlexDirection::Column,
                        align_items: AlignItems::Center,
                        row_gap: Val::Px(12.0),
                        padding: UiRect::all(Val::Px(20.0)),
                        border: UiRect::all(Val::Px(1.0)),
                        ..default()
                    },
                    BackgroundColor(HUD_PANEL_BG),
                    BorderColor::all(HUD_PANEL_BORDER),
                ))
                .with_children(|panel| {
                    panel.spawn((
                        OverlayTextKind::Title,
                        Text::new(""),
                        TextFont {
                            font_size: 46.0,
                            ..default()
                        },
                        TextColor(HUD_TEXT_PRIMARY),
                    ));
                    panel.spawn((
                        OverlayTextKind::Body,
                        Text::new(""),
                        TextFont {
                            font_size: 22.0,
                            ..default()
                        },
                        TextColor(HUD_TEXT_PRIMARY),
                    ));
                });
        });
}

fn cleanup_game_hud(mut commands: Commands, hud_query: Query<Entity, With<GameHudRoot>>) {
    for entity in &hud_query {
        commands.entity(entity).try_despawn();
    }
}

fn update_game_hud(
    session: Option<Res<LevelSession>>,
    mut text_query: Query<(&HudTextKind, &mut Text)>,
) {
    let Some(session) = session else {
        return;
    };

    for (kind, mut text) in &mut text_query {
        let value = match kind {
            HudTextKind::Level => format!("LEVEL {}", session.level_id()),
            HudTextKind::Timer => format_level_time(session.level_timer()),
            HudTextKind::UpsideDown => match session.upside_down_remaining() {
                Some(remaining) if session.phase() == LevelPhase::Playing => {
                    format!("UPSIDE DOWN! {remaining:.1}")
                }
                _ => String::new(),
            },
        };
        if text.0 != value {
            text.0 = value;
        }
    }
}

fn update_level_overlay(
    session: Option<Res<LevelSession>>,
    session_state: Res<SessionState>,
    fail_state: Res<HudFailState>,
    mut overlay_query: Query<&mut Visibility, With<LevelOverlayRoot>>,
    mut text_query: Query<(&OverlayTextKind, &mut Text)>,
) {
    let Ok(mut visibility) = overlay_query.single_mut() else {
        return;
    };
    let content = session.and_then(|session| {
        overlay_content(
            &session,
            session_state.last_completion.as_ref(),
            fail_state.reason,
        )
    });

    let Some(content) = content else {
        *visibility = Visibility::Hidden;
        return;
    };
    *visibility = Visibility::Inherited;

    for (kind, mut text) in &mut text_query {
        let value = match kind {
            OverlayTextKind::Title => &content.title,
            OverlayTextKind::Body => &content.body,
        };
        if &text.0 != value {
            text.0 = value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gameplay::level::lifecycle::LevelRules;

    fn rules() -> LevelRules {
        LevelRules {
            loading_delay_seconds: 0.2,
            resume_delay_seconds: 0.6,
            upside_down_timeout_seconds: 3.0,
            fall_threshold_px: -100.0,
            inverted_min_degrees: 120.0,
            inverted_max_degrees: 240.0,
        }
    }

    fn playing(level_id: u32) -> LevelSession {
        let mut session = LevelSession::new(level_id, rules());
        session.advance_loading(1.0, true);
        session
    }

    #[test]
    fn level_time_has_two_decimals() {
        assert_eq!(format_level_time(0.0), "0.00");
        assert_eq!(format_level_time(12.346), "12.35");
        assert_eq!(format_level_time(-1.0), "0.00");
    }

    #[test]
    fn no_overlay_while_playing() {
        assert_eq!(overlay_content(&playing(1), None, None), None);
        let loading = LevelSession::new(4, rules());
        let content = overlay_content(&loading, None, None).expect("loading overlay");
        assert_eq!(content.body, "Level 4");
    }

    #[test]
    fn completion_overlay_announces_new_best() {
        let mut session = playing(2);
        session.tick(41.5);
        session.complete();
        let record = CompletionRecord {
            level_id: 2,
            seconds: 41.5,
            best_seconds: Some(41.5),
            new_best: true,
            unlocked_next: true,
            rank: Some(1),
        };

        let content = overlay_content(&session, Some(&record), None).expect("overlay");

        assert_eq!(content.title, "LEVEL COMPLETE");
        assert!(content.body.contains("Time 41.50"));
        assert!(content.body.contains("NEW BEST 41.50"));
    }

    #[test]
    fn failure_overlay_names_the_reason() {
        let mut session = playing(1);
        session.check_fall(-500.0);

        let content =
            overlay_content(&session, None, Some(FailReason::FellOut)).expect("overlay");

        assert_eq!(content.title, "FELL OFF THE WORLD");
    }

    #[test]
    fn pause_overlay_lingers_after_resume() {
        let mut session = playing(1);
        session.pause();
        session.resume();

        let content = overlay_content(&session, None, None).expect("overlay");
        assert_eq!(content.title, "PAUSED");
        session.tick(1.0);
        assert_eq!(overlay_content(&session, None, None), None);
    }
}
