use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter, Runtime, State};
use tauri_plugin_global_shortcut::{Code, GlobalShortcutExt, ShortcutState};
#[cfg(target_os = "macos")]
use tracing::warn;
use tracing::{debug, info, trace};

use crate::translation::openai::read_non_empty_env;

pub mod arbiter;
#[cfg(target_os = "macos")]
mod event_tap;

use arbiter::{ComboArbiter, ComboPattern, KeyRole, KeyTransition, ModifierFamily, ModifierSide};

pub const DEFAULT_COMBO: &str = "Alt+1";
pub const COMBO_ENV_VAR: &str = "TRANSLATOR_ACTIVATION_COMBO";
pub const EVENT_ACTIVATED: &str = "translator://activate";
pub const EVENT_HOTKEY_CONFIG_CHANGED: &str = "translator://hotkey-config-changed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyConfig {
    pub combo: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            combo: DEFAULT_COMBO.to_string(),
        }
    }
}

impl HotkeyConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(combo) = read_non_empty_env(COMBO_ENV_VAR) {
            config.combo = combo;
        }

        config
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyActivatedEvent {
    pub combo: String,
}

/// One raw keyboard transition as reported by the platform listener,
/// already lifted out of platform key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawKeyEvent {
    pub(crate) kind: RawKeyKind,
    pub(crate) transition: KeyTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKeyKind {
    Modifier(ModifierFamily, ModifierSide),
    Key(Code),
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerBackend {
    Inactive,
    RawTap,
    PluginShortcut,
}

#[derive(Debug)]
struct HotkeyRuntimeState {
    config: HotkeyConfig,
    registered_combo: Option<String>,
    arbiter: ComboArbiter,
    backend: ListenerBackend,
}

impl Default for HotkeyRuntimeState {
    fn default() -> Self {
        Self {
            config: HotkeyConfig::default(),
            registered_combo: None,
            arbiter: ComboArbiter::new(ComboPattern::default()),
            backend: ListenerBackend::Inactive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HotkeyService {
    state: Arc<Mutex<HotkeyRuntimeState>>,
}

impl Default for HotkeyService {
    fn default() -> Self {
        Self::new()
    }
}

impl HotkeyService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HotkeyRuntimeState::default())),
        }
    }

    /// Starts key listening and registers the startup combo. On macOS a raw
    /// event tap is preferred because it can see suppressor modifiers that
    /// are held alongside the combo; without accessibility permission the
    /// OS-level shortcut registration takes over.
    pub fn start<R: Runtime>(&self, app: &AppHandle<R>) -> Result<HotkeyConfig, String> {
        let config = HotkeyConfig::from_env();

        #[cfg(target_os = "macos")]
        {
            let service = self.clone();
            let tap_app = app.clone();
            match event_tap::spawn_listener(move |event| {
                service.handle_raw_key_event(&tap_app, event);
            }) {
                Ok(()) => {
                    self.set_backend(ListenerBackend::RawTap);
                    info!("raw key event tap active");
                    return self.apply_config(app, config);
                }
                Err(error) => {
                    warn!(
                        %error,
                        "raw key event tap unavailable, falling back to global shortcut registration"
                    );
                }
            }
        }

        self.set_backend(ListenerBackend::PluginShortcut);
        info!("registering activation combo through the global shortcut service");
        self.apply_config(app, config)
    }

    pub fn current_config(&self) -> HotkeyConfig {
        self.state
            .lock()
            .map(|state| state.config.clone())
            .unwrap_or_default()
    }

    pub fn apply_config<R: Runtime>(
        &self,
        app: &AppHandle<R>,
        config: HotkeyConfig,
    ) -> Result<HotkeyConfig, String> {
        match self.backend() {
            ListenerBackend::RawTap => self.apply_config_to_arbiter(config, |config| {
                emit_hotkey_config_changed(app, config)
            }),
            ListenerBackend::PluginShortcut | ListenerBackend::Inactive => {
                let service = self.clone();
                apply_config_with_registrar(
                    &self.state,
                    config,
                    |combo| {
                        app.global_shortcut()
                            .unregister(combo)
                            .map_err(|error| error.to_string())
                    },
                    |combo| {
                        let callback_service = service.clone();
                        app.global_shortcut()
                            .on_shortcut(combo, move |app, _shortcut, event| {
                                callback_service.handle_plugin_shortcut_event(app, event.state);
                            })
                            .map_err(|error| error.to_string())
                    },
                    |config| emit_hotkey_config_changed(app, config),
                )
            }
        }
    }

    fn apply_config_to_arbiter<FE>(
        &self,
        config: HotkeyConfig,
        mut emit_config_changed: FE,
    ) -> Result<HotkeyConfig, String>
    where
        FE: FnMut(&HotkeyConfig),
    {
        let next_config = normalize_config(config);
        let pattern = parse_combo(next_config.combo.as_str())?;

        {
            let mut state = self.state.lock().map_err(|_| lock_error())?;
            state.arbiter.set_pattern(pattern);
            state.config = next_config.clone();
            state.registered_combo = Some(next_config.combo.clone());
        }

        emit_config_changed(&next_config);
        Ok(next_config)
    }

    fn backend(&self) -> ListenerBackend {
        self.state
            .lock()
            .map(|state| state.backend)
            .unwrap_or(ListenerBackend::Inactive)
    }

    fn set_backend(&self, backend: ListenerBackend) {
        if let Ok(mut state) = self.state.lock() {
            state.backend = backend;
        }
    }

    fn handle_raw_key_event<R: Runtime>(&self, app: &AppHandle<R>, event: RawKeyEvent) {
        let fired = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };

            let role = classify_raw_key(state.arbiter.pattern(), event.kind);
            let fired = state.arbiter.handle_key(role, event.transition);
            trace!(state = ?state.arbiter.state(), "raw key event evaluated");
            fired
        };

        if fired {
            self.dispatch_activation(app);
        }
    }

    fn handle_plugin_shortcut_event<R: Runtime>(
        &self,
        app: &AppHandle<R>,
        shortcut_state: ShortcutState,
    ) {
        let fired = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };

            apply_plugin_shortcut_transition(&mut state.arbiter, shortcut_state)
        };

        if fired {
            self.dispatch_activation(app);
        }
    }

    /// Fires the activation event exactly as a combo press would, so other
    /// surfaces such as the tray menu share the popup activation path.
    pub fn request_activation<R: Runtime>(&self, app: &AppHandle<R>) {
        self.dispatch_activation(app);
    }

    fn dispatch_activation<R: Runtime>(&self, app: &AppHandle<R>) {
        let combo = match self.state.lock() {
            Ok(state) => state.config.combo.clone(),
            Err(_) => return,
        };

        debug!(combo = %combo, "activation combo fired");
        let _ = app.emit(EVENT_ACTIVATED, HotkeyActivatedEvent { combo });
    }
}

fn classify_raw_key(pattern: ComboPattern, kind: RawKeyKind) -> KeyRole {
    match kind {
        RawKeyKind::Modifier(family, side) => KeyRole::Modifier(family, side),
        RawKeyKind::Key(code) if code == pattern.key() => KeyRole::ComboKey,
        RawKeyKind::Key(_) | RawKeyKind::Unmapped => KeyRole::Other,
    }
}

/// The OS-level shortcut path only reports whole-chord presses, so the combo
/// modifier and key are replayed into the arbiter as a synthetic pair. The
/// arbiter latch then absorbs repeated press reports from key autorepeat.
fn apply_plugin_shortcut_transition(
    arbiter: &mut ComboArbiter,
    shortcut_state: ShortcutState,
) -> bool {
    let family = arbiter.pattern().modifier();

    match shortcut_state {
        ShortcutState::Pressed => {
            arbiter.handle_key(
                KeyRole::Modifier(family, ModifierSide::Left),
                KeyTransition::Pressed,
            );
            arbiter.handle_key(KeyRole::ComboKey, KeyTransition::Pressed)
        }
        ShortcutState::Released => {
            arbiter.handle_key(KeyRole::ComboKey, KeyTransition::Released);
            arbiter.handle_key(
                KeyRole::Modifier(family, ModifierSide::Left),
                KeyTransition::Released,
            );
            false
        }
    }
}

fn apply_config_with_registrar<FU, FR, FE>(
    state: &Arc<Mutex<HotkeyRuntimeState>>,
    config: HotkeyConfig,
    mut unregister_combo: FU,
    mut register_combo: FR,
    mut emit_config_changed: FE,
) -> Result<HotkeyConfig, String>
where
    FU: FnMut(&str) -> Result<(), String>,
    FR: FnMut(&str) -> Result<(), String>,
    FE: FnMut(&HotkeyConfig),
{
    let next_config = normalize_config(config);
    let pattern = parse_combo(next_config.combo.as_str())?;

    let current_combo = {
        let state = state.lock().map_err(|_| lock_error())?;
        state.registered_combo.clone()
    };

    if current_combo
        .as_deref()
        .is_some_and(|registered| combos_match(registered, next_config.combo.as_str()))
    {
        let mut state = state.lock().map_err(|_| lock_error())?;
        state.config = next_config.clone();
        state.arbiter.set_pattern(pattern);
        drop(state);
        emit_config_changed(&next_config);
        return Ok(next_config);
    }

    let previous_combo = current_combo.clone();

    if let Some(registered_combo) = current_combo {
        unregister_combo(registered_combo.as_str()).map_err(|error| {
            format!("Failed to unregister activation combo `{registered_combo}`: {error}")
        })?;
    }

    if let Err(error) = register_combo(next_config.combo.as_str()) {
        let restored_previous = previous_combo
            .as_deref()
            .is_some_and(|combo| register_combo(combo).is_ok());

        if !restored_previous {
            if let Ok(mut state) = state.lock() {
                state.registered_combo = None;
            }
        }

        return Err(format!(
            "Failed to register activation combo `{}`: {error}",
            next_config.combo
        ));
    }

    {
        let mut state = state.lock().map_err(|_| lock_error())?;
        state.config = next_config.clone();
        state.registered_combo = Some(next_config.combo.clone());
        state.arbiter.set_pattern(pattern);
    }

    emit_config_changed(&next_config);
    Ok(next_config)
}

#[tauri::command]
pub fn get_hotkey_config(service: State<'_, HotkeyService>) -> HotkeyConfig {
    service.current_config()
}

#[tauri::command]
pub fn set_hotkey_config(
    app: AppHandle,
    service: State<'_, HotkeyService>,
    config: HotkeyConfig,
) -> Result<HotkeyConfig, String> {
    service.apply_config(&app, config)
}

fn normalize_config(mut config: HotkeyConfig) -> HotkeyConfig {
    let trimmed_combo = config.combo.trim();
    config.combo = if trimmed_combo.is_empty() {
        DEFAULT_COMBO.to_string()
    } else {
        trimmed_combo.to_string()
    };

    config
}

fn parse_combo(combo: &str) -> Result<ComboPattern, String> {
    ComboPattern::parse(combo)
        .map_err(|error| format!("Invalid activation combo `{combo}`: {error}"))
}

fn combos_match(left: &str, right: &str) -> bool {
    match (ComboPattern::parse(left), ComboPattern::parse(right)) {
        (Ok(left_combo), Ok(right_combo)) => left_combo == right_combo,
        _ => left.eq_ignore_ascii_case(right),
    }
}

fn emit_hotkey_config_changed<R: Runtime>(app: &AppHandle<R>, config: &HotkeyConfig) {
    let _ = app.emit(EVENT_HOTKEY_CONFIG_CHANGED, config);
}

fn lock_error() -> String {
    "Hotkey service state lock was poisoned".to_string()
}
