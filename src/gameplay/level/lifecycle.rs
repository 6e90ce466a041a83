use crate::config::GameConfig;
use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelPhase {
    Loading,
    Playing,
    Paused,
    Completed,
    Failed,
}

impl LevelPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    UpsideDown,
    FellOut,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelResult {
    pub level_id: u32,
    pub elapsed_seconds: f32,
}

/// Outbound notifications consumed by the session controller.
#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub enum LevelSignal {
    Restart { level_id: u32 },
    Quit { level_id: u32 },
    /// Player chose to continue from the completion overlay.
    Next { level_id: u32 },
    Completed { level_id: u32, elapsed_seconds: f32 },
    Failed {
        level_id: u32,
        elapsed_seconds: f32,
        reason: FailReason,
    },
    Paused { level_id: u32 },
    Resumed { level_id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRules {
    pub loading_delay_seconds: f32,
    pub resume_delay_seconds: f32,
    pub upside_down_timeout_seconds: f32,
    pub fall_threshold_px: f32,
    pub inverted_min_degrees: f32,
    pub inverted_max_degrees: f32,
}

impl LevelRules {
    pub fn from_config(config: &GameConfig) -> Self {
        let level = &config.game.level;
        Self {
            loading_delay_seconds: level.loading_delay_seconds,
            resume_delay_seconds: level.resume_delay_seconds,
            upside_down_timeout_seconds: level.upside_down_timeout_seconds,
            fall_threshold_px: level.fall_threshold_px,
            inverted_min_degrees: level.inverted_min_degrees,
            inverted_max_degrees: level.inverted_max_degrees,
        }
    }

    pub fn is_inverted(&self, rotation_degrees: f32) -> bool {
        let normalized = normalize_degrees(rotation_degrees);
        normalized > self.inverted_min_degrees && normalized < self.inverted_max_degrees
    }
}

pub fn normalize_degrees(degrees: f32) -> f32 {
    degrees.rem_euclid(360.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpsideDownTimer {
    elapsed: Option<f32>,
}

impl UpsideDownTimer {
    pub fn is_running(&self) -> bool {
        self.elapsed.is_some()
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed.unwrap_or(0.0)
    }

    pub fn remaining(&self, timeout_seconds: f32) -> Option<f32> {
        self.elapsed
            .map(|elapsed| (timeout_seconds - elapsed).max(0.0))
    }

    fn start(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(0.0);
        }
    }

    fn stop(&mut self) {
        self.elapsed = None;
    }
}

/// Per-level lifecycle: phase, level timer and the upside-down countdown.
#[derive(Resource, Debug, Clone)]
pub struct LevelSession {
    level_id: u32,
    phase: LevelPhase,
    rules: LevelRules,
    loading_elapsed: f32,
    level_timer: f32,
    upside_down: UpsideDownTimer,
    pause_overlay_hide_in: Option<f32>,
}

impl LevelSession {
    pub fn new(level_id: u32, rules: LevelRules) -> Self {
        Self {
            level_id,
            phase: LevelPhase::Loading,
            rules,
            loading_elapsed: 0.0,
            level_timer: 0.0,
            upside_down: UpsideDownTimer::default(),
            pause_overlay_hide_in: None,
        }
    }

    pub fn level_id(&self) -> u32 {
        self.level_id
    }

    pub fn phase(&self) -> LevelPhase {
        self.phase
    }

    pub fn rules(&self) -> &LevelRules {
        &self.rules
    }

    pub fn set_upside_down_timeout(&mut self, timeout_seconds: f32) {
        self.rules.upside_down_timeout_seconds = timeout_seconds.max(0.1);
    }

    pub fn level_timer(&self) -> f32 {
        self.level_timer
    }

    pub fn upside_down(&self) -> UpsideDownTimer {
        self.upside_down
    }

    pub fn upside_down_remaining(&self) -> Option<f32> {
        self.upside_down
            .remaining(self.rules.upside_down_timeout_seconds)
    }

    pub fn loading_delay_elapsed(&self) -> bool {
        self.loading_elapsed >= self.rules.loading_delay_seconds
    }

    /// Pause overlay stays up while paused and for a short while after resuming.
    pub fn pause_overlay_visible(&self) -> bool {
        self.phase == LevelPhase::Paused || self.pause_overlay_hide_in.is_some()
    }

    /// Counts the loading delay and enters `Playing` once the world is built.
    pub fn advance_loading(&mut self, delta_seconds: f32, world_ready: bool) -> bool {
        if self.phase != LevelPhase::Loading {
            return false;
        }
        self.loading_elapsed += delta_seconds.max(0.0);
        if world_ready && self.loading_delay_elapsed() {
            self.phase = LevelPhase::Playing;
            return true;
        }
        false
    }

    pub fn pause(&mut self) -> Option<LevelSignal> {
        if self.phase != LevelPhase::Playing {
            return None;
        }
        self.phase = LevelPhase::Paused;
        self.pause_overlay_hide_in = None;
        Some(LevelSignal::Paused {
            level_id: self.level_id,
        })
    }

    pub fn resume(&mut self) -> Option<LevelSignal> {
        if self.phase != LevelPhase::Paused {
            return None;
        }
        self.phase = LevelPhase::Playing;
        self.pause_overlay_hide_in = Some(self.rules.resume_delay_seconds);
        Some(LevelSignal::Resumed {
            level_id: self.level_id,
        })
    }

    /// Advances the level timer and the post-resume overlay delay.
    pub fn tick(&mut self, delta_seconds: f32) {
        let delta_seconds = delta_seconds.max(0.0);
        if self.phase != LevelPhase::Playing {
            return;
        }
        self.level_timer += delta_seconds;

        if let Some(remaining) = self.pause_overlay_hide_in.as_mut() {
            *remaining -= delta_seconds;
            if *remaining <= 0.0 {
                self.pause_overlay_hide_in = None;
            }
        }
    }

    /// Chassis-on-land contact: starts the countdown when inverted, cancels it otherwise.
    pub fn on_chassis_ground_contact(&mut self, rotation_degrees: f32, vehicle_destroyed: bool) {
        if self.phase != LevelPhase::Playing || vehicle_destroyed {
            return;
        }
        if self.rules.is_inverted(rotation_degrees) {
            self.upside_down.start();
        } else {
            self.upside_down.stop();
        }
    }

    /// Per-frame countdown update. Returns the result when the timeout fails the level.
    pub fn update_upside_down(
        &mut self,
        delta_seconds: f32,
        rotation_degrees: f32,
    ) -> Option<LevelResult> {
        if self.phase != LevelPhase::Playing || !self.upside_down.is_running() {
            return None;
        }
        if !self.rules.is_inverted(rotation_degrees) {
            self.upside_down.stop();
            return None;
        }

        let elapsed = self.upside_down.elapsed() + delta_seconds.max(0.0);
        self.upside_down.elapsed = Some(elapsed);
        if elapsed >= self.rules.upside_down_timeout_seconds {
            return self.fail();
        }
        None
    }

    pub fn check_fall(&mut self, vehicle_y_px: f32) -> Option<LevelResult> {
        if self.phase != LevelPhase::Playing || vehicle_y_px >= self.rules.fall_threshold_px {
            return None;
        }
        self.fail()
    }

    /// Finish reached. Only the first call while playing yields a result.
    pub fn complete(&mut self) -> Option<LevelResult> {
        if self.phase != LevelPhase::Playing {
            return None;
        }
        self.phase = LevelPhase::Completed;
        self.upside_down.stop();
        Some(self.result())
    }

    pub fn fail(&mut self) -> Option<LevelResult> {
        if self.phase != LevelPhase::Playing {
            return None;
        }
        self.phase = LevelPhase::Failed;
        Some(self.result())
    }

    fn result(&self) -> LevelResult {
        LevelResult {
            level_id: self.level_id,
            elapsed_seconds: self.level_timer,
        }
    }
}

/// Physics advances in every phase except loading and pause, unless the vehicle
/// is within the configured margin of the far edge.
pub fn should_step_physics(
    phase: LevelPhase,
    vehicle_right_px: f32,
    level_width_px: f32,
    far_edge_margin_px: Option<f32>,
) -> bool {
    if matches!(phase, LevelPhase::Loading | LevelPhase::Paused) {
        return false;
    }
    match far_edge_margin_px {
        Some(margin) => vehicle_right_px < level_width_px - margin,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> LevelRules {
        LevelRules {
            loading_delay_seconds: 0.2,
            resume_delay_seconds: 0.6,
            upside_down_timeout_seconds: 2.0,
            fall_threshold_px: -100.0,
            inverted_min_degrees: 120.0,
            inverted_max_degrees: 240.0,
        }
    }

    fn playing_session() -> LevelSession {
        let mut session = LevelSession::new(3, rules());
        assert!(session.advance_loading(0.25, true));
        session
    }

    #[test]
    fn orientation_band_is_strict() {
        let rules = rules();
        let inverted: Vec<f32> = [0.0, 119.0, 120.0, 180.0, 240.0, 241.0, 359.0]
            .into_iter()
            .filter(|angle| rules.is_inverted(*angle))
            .collect();

        assert_eq!(inverted, vec![180.0]);
        assert!(rules.is_inverted(-180.0));
        assert!(rules.is_inverted(540.0));
        assert!(!rules.is_inverted(-30.0));
    }

    #[test]
    fn loading_waits_for_delay_and_world() {
        let mut session = LevelSession::new(1, rules());

        assert!(!session.advance_loading(0.1, true));
        assert!(!session.advance_loading(0.15, false));
        assert_eq!(session.phase(), LevelPhase::Loading);
        assert!(session.advance_loading(0.0, true));
        assert_eq!(session.phase(), LevelPhase::Playing);
        assert_eq!(session.level_timer(), 0.0);
    }

    #[test]
    fn upside_down_for_full_timeout_fails_once() {
        let mut session = playing_session();
        session.tick(4.0);
        session.on_chassis_ground_contact(180.0, false);

        assert!(session.update_upside_down(1.5, 180.0).is_none());
        let result = session
            .update_upside_down(0.5, 180.0)
            .expect("timeout reached");

        assert_eq!(session.phase(), LevelPhase::Failed);
        assert_eq!(result.elapsed_seconds, 4.0);
        assert!(session.update_upside_down(1.0, 180.0).is_none());
    }

    #[test]
    fn upside_down_just_short_of_timeout_keeps_playing() {
        let mut session = playing_session();
        session.on_chassis_ground_contact(200.0, false);

        assert!(session.update_upside_down(1.5, 200.0).is_none());
        assert!(session.update_upside_down(0.49, 200.0).is_none());
        assert_eq!(session.phase(), LevelPhase::Playing);
        assert!((session.upside_down_remaining().unwrap_or(0.0) - 0.01).abs() < 1e-4);
    }

    #[test]
    fn turning_upright_resets_the_countdown() {
        let mut session = playing_session();
        session.on_chassis_ground_contact(180.0, false);
        assert!(session.update_upside_down(1.99, 180.0).is_none());

        assert!(session.update_upside_down(0.0, 90.0).is_none());
        assert!(!session.upside_down().is_running());

        // Back on its roof: a new contact starts a fresh countdown.
        assert!(session.update_upside_down(1.0, 180.0).is_none());
        session.on_chassis_ground_contact(180.0, false);
        assert!(session.update_upside_down(1.99, 180.0).is_none());
        assert_eq!(session.phase(), LevelPhase::Playing);
    }

    #[test]
    fn upright_contact_stops_countdown() {
        let mut session = playing_session();
        session.on_chassis_ground_contact(180.0, false);
        session.update_upside_down(1.0, 180.0);

        session.on_chassis_ground_contact(10.0, false);

        assert!(!session.upside_down().is_running());
        assert_eq!(session.upside_down_remaining(), None);
    }

    #[test]
    fn destroyed_vehicle_contacts_are_ignored() {
        let mut session = playing_session();
        session.on_chassis_ground_contact(180.0, true);

        assert!(!session.upside_down().is_running());
    }

    #[test]
    fn completion_is_idempotent() {
        let mut session = playing_session();
        session.tick(12.5);

        let first = session.complete();
        let second = session.complete();

        assert_eq!(
            first,
            Some(LevelResult {
                level_id: 3,
                elapsed_seconds: 12.5
            })
        );
        assert_eq!(second, None);
        assert_eq!(session.phase(), LevelPhase::Completed);
        assert!(session.fail().is_none());
    }

    #[test]
    fn falling_out_fails_once_and_freezes_timer() {
        let mut session = playing_session();
        session.tick(7.25);

        assert!(session.check_fall(-50.0).is_none());
        let result = session.check_fall(-150.0).expect("fell below threshold");
        assert_eq!(result.elapsed_seconds, 7.25);
        assert!(session.check_fall(-400.0).is_none());

        session.tick(3.0);
        assert_eq!(session.level_timer(), 7.25);
        assert_eq!(session.phase(), LevelPhase::Failed);
    }

    #[test]
    fn pause_does_not_advance_level_timer() {
        let mut session = playing_session();
        session.tick(1.0);

        assert!(session.pause().is_some());
        session.tick(5.0);
        assert!(session.pause().is_none());
        assert!(session.resume().is_some());
        session.tick(0.5);

        assert!((session.level_timer() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn pause_overlay_lingers_for_resume_delay() {
        let mut session = playing_session();
        session.pause();
        assert!(session.pause_overlay_visible());

        session.resume();
        assert!(session.pause_overlay_visible());
        session.tick(0.3);
        assert!(session.pause_overlay_visible());
        session.tick(0.31);
        assert!(!session.pause_overlay_visible());
    }

    #[test]
    fn terminal_phases_reject_pause_and_resume() {
        let mut session = playing_session();
        session.complete();

        assert!(session.pause().is_none());
        assert!(session.resume().is_none());
        assert!(session.phase().is_terminal());
    }

    #[test]
    fn stepping_policy_respects_pause_and_far_edge() {
        assert!(!should_step_physics(LevelPhase::Paused, 0.0, 4000.0, None));
        assert!(!should_step_physics(LevelPhase::Loading, 0.0, 4000.0, None));
        assert!(should_step_physics(LevelPhase::Failed, 3950.0, 4000.0, None));
        assert!(should_step_physics(LevelPhase::Playing, 3850.0, 4000.0, Some(100.0)));
        assert!(!should_step_physics(LevelPhase::Playing, 3900.0, 4000.0, Some(100.0)));
    }
}
