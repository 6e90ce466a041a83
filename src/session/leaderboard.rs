use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmitReceipt {
    pub rank: u32,
    pub total_players: u32,
    pub best_seconds: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardError {
    Unavailable(String),
    Rejected(String),
}

impl Display for LeaderboardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "leaderboard unavailable: {reason}"),
            Self::Rejected(reason) => write!(f, "leaderboard rejected result: {reason}"),
        }
    }
}

impl Error for LeaderboardError {}

pub trait LeaderboardService: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn submit_result(
        &mut self,
        user_id: &str,
        level_id: u32,
        seconds: f32,
    ) -> Result<SubmitReceipt, LeaderboardError>;
}

/// Local-only board: keeps each player's best per level and ranks against them.
#[derive(Debug, Clone, Default)]
pub struct OfflineLeaderboard {
    best_by_level: HashMap<u32, HashMap<String, f32>>,
}

impl LeaderboardService for OfflineLeaderboard {
    fn name(&self) -> &str {
        "offline"
    }

    fn submit_result(
        &mut self,
        user_id: &str,
        level_id: u32,
        seconds: f32,
    ) -> Result<SubmitReceipt, LeaderboardError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(LeaderboardError::Rejected(format!(
                "time {seconds} for level {level_id} is not a positive duration"
            )));
        }

        let board = self.best_by_level.entry(level_id).or_default();
        let best = board.entry(user_id.to_string()).or_insert(seconds);
        *best = best.min(seconds);
        let user_best = *best;

        let faster = board.values().filter(|time| **time < user_best).count() as u32;
        Ok(SubmitReceipt {
            rank: faster + 1,
            total_players: board.len() as u32,
            best_seconds: board.values().copied().fold(f32::INFINITY, f32::min),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_board_ranks_player_bests() {
        let mut board = OfflineLeaderboard::default();

        board.submit_result("a", 1, 40.0).expect("accepted");
        board.submit_result("b", 1, 35.0).expect("accepted");
        let receipt = board.submit_result("a", 1, 50.0).expect("accepted");

        assert_eq!(receipt.rank, 2);
        assert_eq!(receipt.total_players, 2);
        assert_eq!(receipt.best_seconds, 35.0);
    }

    #[test]
    fn nonsense_times_are_rejected() {
        let mut board = OfflineLeaderboard::default();

        assert!(board.submit_result("a", 1, 0.0).is_err());
        assert!(board.submit_result("a", 1, f32::NAN).is_err());
    }
}
