use crate::config::{DriveConfig, GameConfig};
use crate::gameplay::level::lifecycle::LevelSession;
use crate::gameplay::vehicle::rig::VehicleControl;
use crate::gameplay::vehicle::{chassis_rotation_degrees, PlayerVehicle, VehicleInputState};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPrimaryContextPass};
use bevy_rapier2d::prelude::Velocity;
use std::fs;
use std::path::Path;

const VEHICLE_CONFIG_FILE: &str = "vehicle.toml";

pub struct DebugOverlayPlugin;

impl Plugin for DebugOverlayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugPanelState>()
            .add_systems(Startup, show_panel_from_config)
            .add_systems(Update, toggle_debug_panel)
            .add_systems(
                EguiPrimaryContextPass,
                debug_panel_ui
                    .run_if(in_state(GameState::InLevel))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

/// Values the panel lets you tweak while driving.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DriveTuning {
    wheel_torque: f32,
    max_wheel_angular_speed: f32,
    jump_impulse: f32,
    jump_wait_seconds: f32,
    upside_down_timeout_seconds: f32,
}

impl DriveTuning {
    fn from_config(config: &GameConfig) -> Self {
        let drive = &config.vehicle.drive;
        Self {
            wheel_torque: drive.wheel_torque,
            max_wheel_angular_speed: drive.max_wheel_angular_speed,
            jump_impulse: drive.jump_impulse,
            jump_wait_seconds: drive.jump_wait_seconds,
            upside_down_timeout_seconds: config.game.level.upside_down_timeout_seconds,
        }
    }

    fn apply_to_drive(&self, drive: &mut DriveConfig) {
        drive.wheel_torque = self.wheel_torque;
        drive.max_wheel_angular_speed = self.max_wheel_angular_speed;
        drive.jump_impulse = self.jump_impulse;
        drive.jump_wait_seconds = self.jump_wait_seconds;
    }
}

#[derive(Resource, Debug, Default)]
struct DebugPanelState {
    visible: bool,
    tuning: Option<DriveTuning>,
    status: String,
}

fn show_panel_from_config(config: Res<GameConfig>, mut panel_state: ResMut<DebugPanelState>) {
    panel_state.visible = config.game.app.debug_overlay;
}

fn toggle_debug_panel(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut panel_state: ResMut<DebugPanelState>,
) {
    if !keyboard.just_pressed(KeyCode::F1) {
        return;
    }

    panel_state.visible = !panel_state.visible;
    panel_state.tuning = None;
    if panel_state.visible {
        info!("Debug panel shown.");
    } else {
        info!("Debug panel hidden.");
    }
}

fn debug_panel_ui(
    mut egui_contexts: EguiContexts,
    mut panel_state: ResMut<DebugPanelState>,
    mut config: ResMut<GameConfig>,
    input: Res<VehicleInputState>,
    mut session: Option<ResMut<LevelSession>>,
    vehicle_query: Query<(&Transform, &Velocity, &VehicleControl), With<PlayerVehicle>>,
) {
    if !panel_state.visible {
        return;
    }

    let mut tuning = match panel_state.tuning {
        Some(tuning) => tuning,
        None => DriveTuning::from_config(&config),
    };
    let before = tuning;
    let mut window_open = true;
    let mut save_clicked = false;
    let mut reset_clicked = false;
    let status = panel_state.status.clone();

    let Ok(ctx) = egui_contexts.ctx_mut() else {
        return;
    };
    egui::Window::new("Level Debug")
        .open(&mut window_open)
        .resizable(true)
        .default_width(360.0)
        .show(ctx, |ui| {
            match session.as_deref() {
                Some(session) => {
                    ui.label(format!(
                        "Level {}  phase {:?}",
                        session.level_id(),
                        session.phase()
                    ));
                    ui.label(format!("Timer {:.2}s", session.level_timer()));
                    match session.upside_down_remaining() {
                        Some(remaining) => ui.label(format!("Upside down, {remaining:.2}s left")),
                        None => ui.label("Upright"),
                    };
                }
                None => {
                    ui.label("No level session.");
                }
            }

            match vehicle_query.single() {
                Ok((transform, velocity, control)) => {
                    ui.label(format!(
                        "Chassis ({:.0}, {:.0})  angle {:.1}",
                        transform.translation.x,
                        transform.translation.y,
                        chassis_rotation_degrees(transform)
                    ));
                    ui.label(format!(
                        "Speed {:.1}  spin {:.2}",
                        velocity.linvel.length(),
                        velocity.angvel
                    ));
                    ui.label(format!(
                        "Grounded {}  jump wait {:.2}  destroyed {}",
                        control.is_touching_ground(),
                        control.jump_wait(),
                        control.is_destroyed()
                    ));
                }
                Err(_) => {
                    ui.label("No vehicle.");
                }
            }
            ui.label(format!(
                "Input fwd {} back {} jump {}/{}",
                input.forward, input.backward, input.jump_forward, input.jump_backward
            ));

            ui.separator();
            tuning_slider_row(ui, "wheel torque", &mut tuning.wheel_torque, 0.0..=200.0, 0.5);
            tuning_slider_row(
                ui,
                "max wheel spin",
                &mut tuning.max_wheel_angular_speed,
                1.0..=120.0,
                0.5,
            );
            tuning_slider_row(ui, "jump impulse", &mut tuning.jump_impulse, 0.0..=100.0, 0.25);
            tuning_slider_row(
                ui,
                "jump wait (s)",
                &mut tuning.jump_wait_seconds,
                0.0..=2.0,
                0.01,
            );
            tuning_slider_row(
                ui,
                "upside-down timeout (s)",
                &mut tuning.upside_down_timeout_seconds,
                0.5..=10.0,
                0.05,
            );

            ui.horizontal(|ui| {
                save_clicked = ui.button("Save to config").clicked();
                reset_clicked = ui.button("Reset").clicked();
            });
            if !status.is_empty() {
                ui.label(status);
            }
        });

    if !window_open {
        panel_state.visible = false;
        return;
    }

    if reset_clicked {
        panel_state.tuning = None;
        panel_state.status = "Tuning reset to loaded config.".to_string();
        return;
    }

    if tuning != before {
        tuning.apply_to_drive(&mut config.vehicle.drive);
        config.game.level.upside_down_timeout_seconds = tuning.upside_down_timeout_seconds;
        if let Some(session) = session.as_deref_mut() {
            session.set_upside_down_timeout(tuning.upside_down_timeout_seconds);
        }
    }
    panel_state.tuning = Some(tuning);

    if save_clicked {
        panel_state.status = match persist_tuning(&tuning) {
            Ok(message) => {
                info!("{message}");
                message
            }
            Err(error) => {
                warn!("{error}");
                error
            }
        };
    }
}

fn tuning_slider_row(
    ui: &mut egui::Ui,
    label: &str,
    value: &mut f32,
    slider_range: std::ops::RangeInclusive<f32>,
    drag_speed: f32,
) {
    ui.horizontal(|ui| {
        ui.label(label);
        ui.add(egui::Slider::new(value, slider_range).show_value(false));
        ui.add(egui::DragValue::new(value).speed(drag_speed as f64));
    });
}

fn persist_tuning(tuning: &DriveTuning) -> Result<String, String> {
    let config_dir = Path::new("config");
    let vehicle_path = config_dir.join(VEHICLE_CONFIG_FILE);
    let game_path = config_dir.join("game.toml");

    update_toml_file(&vehicle_path, |root| write_drive_to_toml(root, tuning))?;
    update_toml_file(&game_path, |root| {
        set_toml_float(
            root,
            &["level", "upside_down_timeout_seconds"],
            tuning.upside_down_timeout_seconds,
        )
    })?;

    GameConfig::load_from_dir(config_dir)
        .map_err(|error| format!("Saved tuning no longer validates: {error}"))?;
    Ok(format!(
        "Saved tuning to `{}` and `{}`.",
        vehicle_path.display(),
        game_path.display()
    ))
}

fn update_toml_file(
    path: &Path,
    edit: impl FnOnce(&mut toml::Value) -> Result<(), String>,
) -> Result<(), String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("Failed reading `{}`: {error}", path.display()))?;
    let mut root: toml::Value = toml::from_str(&raw)
        .map_err(|error| format!("Failed parsing `{}`: {error}", path.display()))?;
    edit(&mut root)?;
    let updated = toml::to_string_pretty(&root)
        .map_err(|error| format!("Failed serializing `{}`: {error}", path.display()))?;
    fs::write(path, updated).map_err(|error| format!("Failed writing `{}`: {error}", path.display()))
}

fn write_drive_to_toml(root: &mut toml::Value, tuning: &DriveTuning) -> Result<(), String> {
    set_toml_float(root, &["drive", "wheel_torque"], tuning.wheel_torque)?;
    set_toml_float(
        root,
        &["drive", "max_wheel_angular_speed"],
        tuning.max_wheel_angular_speed,
    )?;
    set_toml_float(root, &["drive", "jump_impulse"], tuning.jump_impulse)?;
    set_toml_float(root, &["drive", "jump_wait_seconds"], tuning.jump_wait_seconds)
}

fn set_toml_float(root: &mut toml::Value, path: &[&str], value: f32) -> Result<(), String> {
    let Some((key, tables)) = path.split_last() else {
        return Err("empty TOML key path".to_string());
    };
    if !value.is_finite() {
        return Err(format!("`{key}` is not a finite number"));
    }

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| "TOML root is not a table".to_string())?;
    for name in tables {
        table = table
            .get_mut(*name)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| format!("missing `[{name}]` table"))?;
    }

    table.insert(key.to_string(), toml::Value::Float(value as f64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> DriveTuning {
        DriveTuning {
            wheel_torque: 42.0,
            max_wheel_angular_speed: 30.0,
            jump_impulse: 12.5,
            jump_wait_seconds: 0.25,
            upside_down_timeout_seconds: 4.0,
        }
    }

    #[test]
    fn drive_values_are_written_into_existing_table() {
        let mut root: toml::Value =
            toml::from_str("[drive]\nwheel_torque = 1.0\njump_strength = 0.5\n").expect("toml");

        write_drive_to_toml(&mut root, &tuning()).expect("write");

        let drive = root.get("drive").expect("drive table");
        assert_eq!(drive.get("wheel_torque").and_then(toml::Value::as_float), Some(42.0));
        assert_eq!(drive.get("jump_impulse").and_then(toml::Value::as_float), Some(12.5));
        assert_eq!(drive.get("jump_strength").and_then(toml::Value::as_float), Some(0.5));
    }

    #[test]
    fn missing_table_and_bad_values_are_reported() {
        let mut root: toml::Value = toml::from_str("[wheels]\nradius_px = 22.0\n").expect("toml");

        assert!(write_drive_to_toml(&mut root, &tuning()).is_err());
        assert!(set_toml_float(&mut root, &["wheels", "radius_px"], f32::NAN).is_err());
    }

    #[test]
    fn tuning_applies_to_drive_config() {
        let mut config = crate::config::tests::sample_config();
        let tuning = tuning();

        tuning.apply_to_drive(&mut config.vehicle.drive);

        assert_eq!(DriveTuning::from_config(&config).wheel_torque, 42.0);
        assert_eq!(config.vehicle.drive.jump_wait_seconds, 0.25);
    }
}
