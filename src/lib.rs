#![allow(dead_code)]

mod hotkey_service;
mod logging;
mod status_notifier;
mod translation;
mod translation_pipeline;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hotkey_service::HotkeyService;
use serde::Serialize;
use status_notifier::{AppStatus, StatusNotifier};
use tauri::{
    menu::{Menu, MenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconEvent},
    AppHandle, Emitter, Listener, Manager,
};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_notification::NotificationExt;
use tracing::{debug, warn};
use translation::openai::{OpenAiCompletionConfig, OpenAiCompletionProvider};
use translation::{TranslationEngine, TranslationOutcome, TranslationRequest};
use translation_pipeline::{TranslationPipeline, TranslationPipelineDelegate};

const EVENT_STATUS_CHANGED: &str = "translator://status-changed";
const EVENT_TRANSLATION_FINISHED: &str = "translator://translation-finished";

// Popup geometry in logical pixels.
const POPUP_WIDTH: f64 = 400.0;
const POPUP_HEIGHT: f64 = 240.0;
const POPUP_EDGE_MARGIN: f64 = 10.0;
const POPUP_CURSOR_OFFSET: f64 = 20.0;
const POPUP_BOTTOM_RESERVE: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslationFinishedEvent {
    text: String,
    success: bool,
}

impl TranslationFinishedEvent {
    fn from_outcome(outcome: &TranslationOutcome) -> Self {
        Self {
            text: outcome.text().to_string(),
            success: outcome.is_success(),
        }
    }
}

#[derive(Debug)]
struct AppServices {
    translation_engine: TranslationEngine,
    completion_model: String,
}

impl Default for AppServices {
    fn default() -> Self {
        let config = OpenAiCompletionConfig::from_env();
        let completion_model = config.model.clone();
        let provider = OpenAiCompletionProvider::new(config);

        Self {
            translation_engine: TranslationEngine::new(Arc::new(provider)),
            completion_model,
        }
    }
}

#[derive(Debug, Default)]
struct AppState {
    status_notifier: Mutex<StatusNotifier>,
    services: AppServices,
}

/// Guards the one-at-a-time translation rule: a submission only proceeds
/// when it can take the lock without waiting, otherwise it is rejected.
#[derive(Debug, Clone)]
struct TranslationRuntimeState {
    execution_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for TranslationRuntimeState {
    fn default() -> Self {
        Self {
            execution_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

impl TranslationRuntimeState {
    fn try_begin(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        Arc::clone(&self.execution_lock).try_lock_owned().ok()
    }

    fn is_translating(&self) -> bool {
        self.execution_lock.try_lock().is_err()
    }
}

#[derive(Clone)]
struct AppTranslationDelegate {
    app: AppHandle,
}

impl AppTranslationDelegate {
    fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

#[async_trait]
impl TranslationPipelineDelegate for AppTranslationDelegate {
    fn set_status(&self, status: AppStatus) {
        set_status_for_app(&self.app, status);
    }

    fn emit_outcome(&self, outcome: &TranslationOutcome) {
        emit_translation_finished(&self.app, outcome);
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, String> {
        let engine = {
            let state = self.app.state::<AppState>();
            state.services.translation_engine.clone()
        };

        engine
            .translate(request)
            .await
            .map_err(|error| error.to_string())
    }
}

fn get_status_from_state(state: &AppState) -> AppStatus {
    state
        .status_notifier
        .lock()
        .map(|notifier| notifier.current())
        .unwrap_or(AppStatus::Error)
}

fn set_status_for_state(app: &AppHandle, state: &AppState, status: AppStatus) {
    if let Ok(mut notifier) = state.status_notifier.lock() {
        notifier.set(status);
    }

    let _ = app.emit(EVENT_STATUS_CHANGED, status);
}

fn set_status_for_app(app: &AppHandle, status: AppStatus) {
    let state = app.state::<AppState>();
    set_status_for_state(app, &state, status);
}

fn emit_translation_finished(app: &AppHandle, outcome: &TranslationOutcome) {
    let _ = app.emit(
        EVENT_TRANSLATION_FINISHED,
        TranslationFinishedEvent::from_outcome(outcome),
    );
}

fn spawn_translation(app: &AppHandle, request: TranslationRequest) -> bool {
    let runtime_state = app.state::<TranslationRuntimeState>().inner().clone();
    let Some(guard) = runtime_state.try_begin() else {
        debug!("translation request rejected, another translation is in flight");
        return false;
    };

    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        let _guard = guard;
        let delegate = AppTranslationDelegate::new(app);
        TranslationPipeline::default()
            .handle_submission(&delegate, request)
            .await;
    });

    true
}

fn register_activation_handler(app: &AppHandle) {
    let activation_app = app.clone();
    app.listen(hotkey_service::EVENT_ACTIVATED, move |_| {
        let main_thread_app = activation_app.clone();
        let marshal_result = activation_app.run_on_main_thread(move || {
            show_translation_popup(&main_thread_app);
        });

        if let Err(error) = marshal_result {
            warn!(%error, "failed to marshal popup activation onto the main thread");
        }
    });
}

/// Places the popup horizontally centered under the cursor, clamped to the
/// screen with a small margin. When there is not enough room underneath the
/// popup flips above the cursor instead.
fn popup_position(cursor: (f64, f64), screen: (f64, f64)) -> (f64, f64) {
    let (cursor_x, cursor_y) = cursor;
    let (screen_width, screen_height) = screen;

    let max_x = (screen_width - POPUP_WIDTH - POPUP_EDGE_MARGIN).max(POPUP_EDGE_MARGIN);
    let x = (cursor_x - POPUP_WIDTH / 2.0).clamp(POPUP_EDGE_MARGIN, max_x);

    let below = cursor_y + POPUP_CURSOR_OFFSET;
    let y = if below + POPUP_HEIGHT <= screen_height - POPUP_BOTTOM_RESERVE {
        below
    } else {
        cursor_y - POPUP_HEIGHT - POPUP_CURSOR_OFFSET
    };

    (x, y)
}

fn show_translation_popup(app: &AppHandle) {
    let Some(window) = app.get_webview_window("main") else {
        return;
    };

    let placement = window
        .cursor_position()
        .ok()
        .zip(window.primary_monitor().ok().flatten())
        .map(|(cursor, monitor)| {
            let scale = monitor.scale_factor();
            let cursor = cursor.to_logical::<f64>(scale);
            let screen = monitor.size().to_logical::<f64>(scale);
            popup_position((cursor.x, cursor.y), (screen.width, screen.height))
        });

    if let Some((x, y)) = placement {
        let _ = window.set_position(tauri::LogicalPosition::new(x, y));
    }

    let _ = window.show();
    let _ = window.set_focus();
}

fn hide_translation_popup(app: &AppHandle) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.hide();
    }
}

/// Routes through the same activation event the combo press fires, so the
/// popup is positioned and the input cleared no matter which surface asked.
fn activate_translator(app: &AppHandle) {
    app.state::<HotkeyService>().request_activation(app);
}

fn handle_tray_menu_event(app: &AppHandle, menu_id: &str) {
    match menu_id {
        "open_translator" => activate_translator(app),
        "quit" => app.exit(0),
        _ => {}
    }
}

#[tauri::command]
fn get_status(state: tauri::State<'_, AppState>) -> AppStatus {
    get_status_from_state(&state)
}

#[tauri::command]
fn translate_text(app: AppHandle, text: String) -> Result<bool, String> {
    let request = TranslationRequest::new(text.as_str())
        .ok_or_else(|| "Cannot translate empty text".to_string())?;

    Ok(spawn_translation(&app, request))
}

#[tauri::command]
fn is_translation_active(runtime_state: tauri::State<'_, TranslationRuntimeState>) -> bool {
    runtime_state.is_translating()
}

#[tauri::command]
fn copy_result(app: AppHandle, text: String) -> Result<(), String> {
    app.clipboard()
        .write_text(text)
        .map_err(|error| error.to_string())
}

#[tauri::command]
fn hide_popup(app: AppHandle) {
    hide_translation_popup(&app);
}

#[tauri::command]
fn export_logs(logging_state: tauri::State<'_, logging::LoggingState>) -> Result<String, String> {
    logging::export_log_contents(&logging_state)
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_clipboard_manager::init())
        .plugin(tauri_plugin_notification::init())
        .manage(AppState::default())
        .manage(HotkeyService::new())
        .manage(TranslationRuntimeState::default())
        .setup(|app| {
            #[cfg(target_os = "macos")]
            app.set_activation_policy(tauri::ActivationPolicy::Accessory);

            let logging_state =
                logging::initialize(app.handle()).map_err(std::io::Error::other)?;
            app.manage(logging_state);

            app.handle()
                .plugin(tauri_plugin_global_shortcut::Builder::new().build())?;

            let hotkey_service = app.state::<HotkeyService>();
            let applied_config = hotkey_service
                .start(app.handle())
                .map_err(std::io::Error::other)?;

            register_activation_handler(app.handle());
            set_status_for_app(app.handle(), AppStatus::Idle);

            let open_item = MenuItem::with_id(
                app,
                "open_translator",
                "Open Translator",
                true,
                None::<&str>,
            )?;
            let quit_item = MenuItem::with_id(app, "quit", "Quit Translator", true, None::<&str>)?;
            let tray_menu = Menu::with_items(app, &[&open_item, &quit_item])?;

            let mut tray_builder = tauri::tray::TrayIconBuilder::with_id("translator-tray")
                .menu(&tray_menu)
                .tooltip(format!(
                    "Quick Translator - Press {} to open",
                    applied_config.combo
                ))
                .show_menu_on_left_click(false)
                .on_tray_icon_event(|tray, event| {
                    if let TrayIconEvent::Click {
                        button: MouseButton::Left,
                        button_state: MouseButtonState::Up,
                        ..
                    } = event
                    {
                        activate_translator(tray.app_handle());
                    }
                })
                .on_menu_event(|app, event| {
                    handle_tray_menu_event(app, event.id().as_ref());
                });

            if let Some(icon) = app.default_window_icon() {
                tray_builder = tray_builder.icon(icon.clone());
            }

            tray_builder.build(app)?;

            let completion_model = app.state::<AppState>().services.completion_model.clone();
            let _ = app
                .notification()
                .builder()
                .title("Quick Translator started")
                .body(format!(
                    "Press {} to open the translation window\nUsing {completion_model} model",
                    applied_config.combo
                ))
                .show();

            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::CloseRequested { api, .. } = event {
                api.prevent_close();
                let _ = window.hide();
            }
        })
        .invoke_handler(tauri::generate_handler![
            get_status,
            translate_text,
            is_translation_active,
            copy_result,
            hide_popup,
            export_logs,
            hotkey_service::get_hotkey_config,
            hotkey_service::set_hotkey_config
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::translation::TranslationOutcome;

    use super::{popup_position, TranslationFinishedEvent, TranslationRuntimeState};

    #[test]
    fn popup_sits_centered_below_the_cursor_when_it_fits() {
        let (x, y) = popup_position((500.0, 300.0), (1920.0, 1080.0));

        assert_eq!((x, y), (300.0, 320.0));
    }

    #[test]
    fn popup_clamps_to_screen_edges() {
        let (left_x, _) = popup_position((50.0, 300.0), (1920.0, 1080.0));
        assert_eq!(left_x, 10.0);

        let (right_x, _) = popup_position((1900.0, 300.0), (1920.0, 1080.0));
        assert_eq!(right_x, 1510.0);
    }

    #[test]
    fn popup_flips_above_the_cursor_near_the_bottom_of_the_screen() {
        let (_, y) = popup_position((500.0, 900.0), (1920.0, 1080.0));

        assert_eq!(y, 640.0);
    }

    #[test]
    fn popup_placement_stays_in_bounds_on_tiny_screens() {
        let (x, _) = popup_position((150.0, 100.0), (300.0, 200.0));

        assert_eq!(x, 10.0);
    }

    #[test]
    fn second_submission_is_rejected_while_one_is_in_flight() {
        let runtime = TranslationRuntimeState::default();

        let guard = runtime
            .try_begin()
            .expect("first submission should acquire the lock");
        assert!(runtime.is_translating());
        assert!(runtime.try_begin().is_none());

        drop(guard);
        assert!(!runtime.is_translating());
        assert!(runtime.try_begin().is_some());
    }

    #[test]
    fn finished_event_payload_carries_text_and_success_flag() {
        let success = TranslationFinishedEvent::from_outcome(&TranslationOutcome::Success(
            "你好".to_string(),
        ));
        assert_eq!(
            serde_json::to_value(&success).expect("event should serialize"),
            json!({"text": "你好", "success": true})
        );

        let failure = TranslationFinishedEvent::from_outcome(&TranslationOutcome::Failure(
            "Request timeout".to_string(),
        ));
        assert_eq!(
            serde_json::to_value(&failure).expect("event should serialize"),
            json!({"text": "Request timeout", "success": false})
        );
    }
}
