pub mod leaderboard;
pub mod progress;

use crate::config::GameConfig;
use crate::gameplay::level::lifecycle::LevelSignal;
use crate::gameplay::level::{LevelLoadFailed, LevelLoadRequest};
use crate::gameplay::sfx::MusicDeck;
use crate::states::GameState;
use bevy::prelude::*;
use leaderboard::{LeaderboardService, OfflineLeaderboard};
use progress::{JsonProgressStore, MemoryProgressStore, ProgressStore, FIRST_LEVEL_ID};

pub struct SessionPlugin;

impl Plugin for SessionPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SessionState>()
            .add_systems(Startup, open_session_services)
            .add_systems(
                Update,
                (handle_level_signals, handle_level_load_failures)
                    .run_if(resource_exists::<SessionServices>)
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

/// Game-wide collaborators, chosen once at startup.
#[derive(Resource)]
pub struct SessionServices {
    pub progress: Box<dyn ProgressStore>,
    pub leaderboard: Box<dyn LeaderboardService>,
}

impl SessionServices {
    pub fn is_unlocked(&self, level_id: u32) -> bool {
        level_id <= self.progress.unlock_progress()
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SessionState {
    pub selected_level: u32,
    pub last_completion: Option<CompletionRecord>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            selected_level: FIRST_LEVEL_ID,
            last_completion: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionRecord {
    pub level_id: u32,
    pub seconds: f32,
    pub best_seconds: Option<f32>,
    pub new_best: bool,
    pub unlocked_next: bool,
    pub rank: Option<u32>,
}

/// Persists a finished run and reports it to the leaderboard. Storage failures are logged and absorbed.
pub fn record_completion(
    progress: &mut dyn ProgressStore,
    leaderboard: &mut dyn LeaderboardService,
    level_id: u32,
    seconds: f32,
) -> CompletionRecord {
    let new_best = progress
        .save_level_best_time(level_id, seconds)
        .unwrap_or_else(|error| {
            warn!("Could not save best time for level {level_id}: {error}");
            false
        });
    let unlocked_next = progress
        .set_unlock_progress(level_id)
        .unwrap_or_else(|error| {
            warn!("Could not save unlock progress after level {level_id}: {error}");
            false
        });

    let best_seconds = progress.level_best_time(level_id);
    let rank = best_seconds.and_then(|best| {
        match leaderboard.submit_result(progress.user_id(), level_id, best) {
            Ok(receipt) => Some(receipt.rank),
            Err(error) => {
                warn!("Leaderboard `{}` submit failed: {error}", leaderboard.name());
                None
            }
        }
    });

    CompletionRecord {
        level_id,
        seconds,
        best_seconds,
        new_best,
        unlocked_next,
        rank,
    }
}

/// Builds a load request with a fresh gameplay track for `level_id`.
pub fn level_request(config: &GameConfig, deck: &mut MusicDeck, level_id: u32) -> LevelLoadRequest {
    LevelLoadRequest {
        level_id,
        music: deck.next_gameplay_track(&config.levels.music.gameplay),
    }
}

fn open_session_services(mut commands: Commands, config: Res<GameConfig>) {
    let path = &config.game.app.progress_path;
    let progress: Box<dyn ProgressStore> = match JsonProgressStore::open(path) {
        Ok(store) => {
            info!(
                "Progress loaded from `{}`: unlocked through level {}, total {:.2}s.",
                store.path().display(),
                store.unlock_progress(),
                store.total_time()
            );
            Box::new(store)
        }
        Err(error) => {
            warn!("Progress storage unavailable, keeping progress in memory: {error}");
            Box::new(MemoryProgressStore::new(&progress::generate_user_id()))
        }
    };

    let leaderboard = OfflineLeaderboard::default();
    info!("Leaderboard service: {}.", leaderboard.name());

    commands.insert_resource(SessionServices {
        progress,
        leaderboard: Box::new(leaderboard),
    });
}

fn handle_level_signals(
    config: Res<GameConfig>,
    mut signals: MessageReader<LevelSignal>,
    mut services: ResMut<SessionServices>,
    mut session_state: ResMut<SessionState>,
    mut deck: ResMut<MusicDeck>,
    mut load_requests: MessageWriter<LevelLoadRequest>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    for signal in signals.read() {
        match *signal {
            LevelSignal::Completed {
                level_id,
                elapsed_seconds,
            } => {
                let services = &mut *services;
                let record = record_completion(
                    services.progress.as_mut(),
                    services.leaderboard.as_mut(),
                    level_id,
                    elapsed_seconds,
                );
                info!(
                    "Level {level_id} result {:.2}s (best {:?}, new best: {}, rank {:?}).",
                    record.seconds, record.best_seconds, record.new_best, record.rank
                );
                session_state.last_completion = Some(record);
            }
            LevelSignal::Failed {
                level_id, reason, ..
            } => {
                info!("Session: level {level_id} failed ({reason:?}).");
            }
            LevelSignal::Restart { level_id } => {
                load_requests.write(level_request(&config, &mut deck, level_id));
            }
            LevelSignal::Next { level_id } => {
                let next_level = level_id + 1;
                if next_level > config.level_count() {
                    info!("Final level finished; showing game completed screen.");
                    next_state.set(GameState::GameCompleted);
                } else {
                    session_state.selected_level = next_level;
                    load_requests.write(level_request(&config, &mut deck, next_level));
                }
            }
            LevelSignal::Quit { level_id } => {
                info!("Session: quit from level {level_id}.");
                session_state.selected_level = level_id;
                next_state.set(GameState::LevelSelect);
            }
            LevelSignal::Paused { level_id } => {
                debug!("Session: level {level_id} paused.");
            }
            LevelSignal::Resumed { level_id } => {
                debug!("Session: level {level_id} resumed.");
            }
        }
    }
}

fn handle_level_load_failures(
    mut failures: MessageReader<LevelLoadFailed>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    for failure in failures.read() {
        error!(
            "Level {} cannot start: {}. Returning to the level list.",
            failure.level_id, failure.reason
        );
        next_state.set(GameState::LevelSelect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderboard::{LeaderboardError, SubmitReceipt};

    #[derive(Default)]
    struct RecordingLeaderboard {
        submissions: Vec<(String, u32, f32)>,
    }

    impl LeaderboardService for RecordingLeaderboard {
        fn name(&self) -> &str {
            "recording"
        }

        fn submit_result(
            &mut self,
            user_id: &str,
            level_id: u32,
            seconds: f32,
        ) -> Result<SubmitReceipt, LeaderboardError> {
            self.submissions.push((user_id.to_string(), level_id, seconds));
            Ok(SubmitReceipt {
                rank: 1,
                total_players: 1,
                best_seconds: seconds,
            })
        }
    }

    #[test]
    fn best_time_scenario_keeps_only_improvements() {
        let mut store = MemoryProgressStore::new("player-test");
        let mut board = RecordingLeaderboard::default();

        let first = record_completion(&mut store, &mut board, 1, 45.0);
        assert!(first.new_best);
        assert!(first.unlocked_next);
        assert_eq!(store.level_best_time(1), Some(45.0));
        assert_eq!(store.unlock_progress(), 2);

        let second = record_completion(&mut store, &mut board, 1, 50.0);
        assert!(!second.new_best);
        assert!(!second.unlocked_next);
        assert_eq!(second.best_seconds, Some(45.0));

        let third = record_completion(&mut store, &mut board, 1, 40.0);
        assert!(third.new_best);
        assert_eq!(store.level_best_time(1), Some(40.0));

        // One write for each improvement plus the unlock.
        assert_eq!(store.persist_count(), 3);
        let submitted: Vec<f32> = board.submissions.iter().map(|s| s.2).collect();
        assert_eq!(submitted, vec![45.0, 45.0, 40.0]);
        assert!(board
            .submissions
            .iter()
            .all(|(user, level, _)| user == "player-test" && *level == 1));
    }

    #[test]
    fn replaying_an_earlier_level_does_not_lower_progress() {
        let mut store = MemoryProgressStore::new("player-test");
        let mut board = OfflineLeaderboard::default();
        record_completion(&mut store, &mut board, 5, 30.0);

        let record = record_completion(&mut store, &mut board, 2, 20.0);

        assert!(!record.unlocked_next);
        assert_eq!(store.unlock_progress(), 6);
        assert_eq!(record.rank, Some(1));
        assert!((store.total_time() - 50.0).abs() < 1e-4);
    }

    #[test]
    fn level_requests_rotate_music() {
        let config = crate::config::tests::sample_config();
        let mut deck = MusicDeck::default();

        let first = level_request(&config, &mut deck, 1);
        let second = level_request(&config, &mut deck, 1);

        assert_eq!(first.level_id, 1);
        assert!(first.music.is_some());
        assert_ne!(first.music, second.music);
    }
}
