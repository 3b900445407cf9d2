#![cfg(target_os = "macos")]

use std::{sync::mpsc, thread};

use core_foundation::{
    base::Boolean,
    runloop::{kCFRunLoopCommonModes, CFRunLoop},
};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};
use tauri_plugin_global_shortcut::Code;
use tracing::warn;

use super::{
    arbiter::{KeyTransition, ModifierFamily, ModifierSide},
    RawKeyEvent, RawKeyKind,
};

const NX_DEVICELCTLKEYMASK: u64 = 0x00000001;
const NX_DEVICERCTLKEYMASK: u64 = 0x00002000;
const NX_DEVICELSHIFTKEYMASK: u64 = 0x00000002;
const NX_DEVICERSHIFTKEYMASK: u64 = 0x00000004;
const NX_DEVICELCMDKEYMASK: u64 = 0x00000008;
const NX_DEVICERCMDKEYMASK: u64 = 0x00000010;
const NX_DEVICELALTKEYMASK: u64 = 0x00000020;
const NX_DEVICERALTKEYMASK: u64 = 0x00000040;

const KEY_CODE_LEFT_COMMAND: u16 = 0x37;
const KEY_CODE_RIGHT_COMMAND: u16 = 0x36;
const KEY_CODE_LEFT_SHIFT: u16 = 0x38;
const KEY_CODE_RIGHT_SHIFT: u16 = 0x3C;
const KEY_CODE_LEFT_ALT: u16 = 0x3A;
const KEY_CODE_RIGHT_ALT: u16 = 0x3D;
const KEY_CODE_LEFT_CONTROL: u16 = 0x3B;
const KEY_CODE_RIGHT_CONTROL: u16 = 0x3E;

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXIsProcessTrusted() -> Boolean;
}

pub fn has_accessibility_permission() -> bool {
    // SAFETY: AXIsProcessTrusted takes no parameters and returns process trust status.
    unsafe { AXIsProcessTrusted() != 0 }
}

/// Spawns the session-wide key listener thread. Returns once the tap is
/// installed and enabled, or with the reason it could not be.
pub fn spawn_listener<F>(handler: F) -> Result<(), String>
where
    F: Fn(RawKeyEvent) + Send + 'static,
{
    if !has_accessibility_permission() {
        return Err("Accessibility permission is required for the raw key listener".to_string());
    }

    let (startup_tx, startup_rx) = mpsc::channel::<Result<(), String>>();
    thread::Builder::new()
        .name("translator-key-tap".to_string())
        .spawn(move || run_event_tap_thread(handler, startup_tx))
        .map_err(|error| format!("Failed to spawn key listener thread: {error}"))?;

    match startup_rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error),
        Err(error) => Err(format!(
            "Key listener startup channel closed unexpectedly: {error}"
        )),
    }
}

fn run_event_tap_thread<F>(handler: F, startup_tx: mpsc::Sender<Result<(), String>>)
where
    F: Fn(RawKeyEvent) + Send + 'static,
{
    let run_loop = CFRunLoop::get_current();

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        move |_proxy, event_type, event| {
            match event_type {
                CGEventType::KeyDown | CGEventType::KeyUp | CGEventType::FlagsChanged => {
                    if let Some(raw_event) = translate_event(event_type, event) {
                        handler(raw_event);
                    }
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!(
                        ?event_type,
                        "macOS key event tap was disabled by the system; the activation combo may stop firing"
                    );
                }
                _ => {}
            }
            None
        },
    ) {
        Ok(tap) => tap,
        Err(_) => {
            let _ = startup_tx.send(Err("Failed to create CGEventTap".to_string()));
            return;
        }
    };

    let source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            let _ = startup_tx.send(Err("Failed to create event tap runloop source".to_string()));
            return;
        }
    };

    // SAFETY: `kCFRunLoopCommonModes` is a valid CoreFoundation runloop mode.
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    tap.enable();

    if startup_tx.send(Ok(())).is_err() {
        return;
    }

    CFRunLoop::run_current();

    // SAFETY: `kCFRunLoopCommonModes` is the same mode used for add_source above.
    unsafe {
        run_loop.remove_source(&source, kCFRunLoopCommonModes);
    }
}

fn translate_event(event_type: CGEventType, event: &CGEvent) -> Option<RawKeyEvent> {
    let key_code =
        u16::try_from(event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE)).ok()?;

    match event_type {
        CGEventType::KeyDown => {
            if event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0 {
                return None;
            }

            Some(RawKeyEvent {
                kind: key_kind(key_code),
                transition: KeyTransition::Pressed,
            })
        }
        CGEventType::KeyUp => Some(RawKeyEvent {
            kind: key_kind(key_code),
            transition: KeyTransition::Released,
        }),
        CGEventType::FlagsChanged => {
            // Fn and caps lock land outside the tracked modifier slots.
            let (family, side, mask) = modifier_slot(key_code)?;

            Some(RawKeyEvent {
                kind: RawKeyKind::Modifier(family, side),
                transition: flags_transition(mask, event.get_flags().bits()),
            })
        }
        _ => None,
    }
}

fn flags_transition(mask: u64, raw_flags: u64) -> KeyTransition {
    if raw_flags & mask != 0 {
        KeyTransition::Pressed
    } else {
        KeyTransition::Released
    }
}

fn key_kind(key_code: u16) -> RawKeyKind {
    match key_code_to_code(key_code) {
        Some(code) => RawKeyKind::Key(code),
        None => RawKeyKind::Unmapped,
    }
}

fn modifier_slot(key_code: u16) -> Option<(ModifierFamily, ModifierSide, u64)> {
    match key_code {
        KEY_CODE_LEFT_ALT => Some((ModifierFamily::Alt, ModifierSide::Left, NX_DEVICELALTKEYMASK)),
        KEY_CODE_RIGHT_ALT => Some((
            ModifierFamily::Alt,
            ModifierSide::Right,
            NX_DEVICERALTKEYMASK,
        )),
        KEY_CODE_LEFT_SHIFT => Some((
            ModifierFamily::Shift,
            ModifierSide::Left,
            NX_DEVICELSHIFTKEYMASK,
        )),
        KEY_CODE_RIGHT_SHIFT => Some((
            ModifierFamily::Shift,
            ModifierSide::Right,
            NX_DEVICERSHIFTKEYMASK,
        )),
        KEY_CODE_LEFT_CONTROL => Some((
            ModifierFamily::Ctrl,
            ModifierSide::Left,
            NX_DEVICELCTLKEYMASK,
        )),
        KEY_CODE_RIGHT_CONTROL => Some((
            ModifierFamily::Ctrl,
            ModifierSide::Right,
            NX_DEVICERCTLKEYMASK,
        )),
        KEY_CODE_LEFT_COMMAND => Some((
            ModifierFamily::Meta,
            ModifierSide::Left,
            NX_DEVICELCMDKEYMASK,
        )),
        KEY_CODE_RIGHT_COMMAND => Some((
            ModifierFamily::Meta,
            ModifierSide::Right,
            NX_DEVICERCMDKEYMASK,
        )),
        _ => None,
    }
}

fn key_code_to_code(key_code: u16) -> Option<Code> {
    let code = match key_code {
        0x00 => Code::KeyA,
        0x0B => Code::KeyB,
        0x08 => Code::KeyC,
        0x02 => Code::KeyD,
        0x0E => Code::KeyE,
        0x03 => Code::KeyF,
        0x05 => Code::KeyG,
        0x04 => Code::KeyH,
        0x22 => Code::KeyI,
        0x26 => Code::KeyJ,
        0x28 => Code::KeyK,
        0x25 => Code::KeyL,
        0x2E => Code::KeyM,
        0x2D => Code::KeyN,
        0x1F => Code::KeyO,
        0x23 => Code::KeyP,
        0x0C => Code::KeyQ,
        0x0F => Code::KeyR,
        0x01 => Code::KeyS,
        0x11 => Code::KeyT,
        0x20 => Code::KeyU,
        0x09 => Code::KeyV,
        0x0D => Code::KeyW,
        0x07 => Code::KeyX,
        0x10 => Code::KeyY,
        0x06 => Code::KeyZ,
        0x1D => Code::Digit0,
        0x12 => Code::Digit1,
        0x13 => Code::Digit2,
        0x14 => Code::Digit3,
        0x15 => Code::Digit4,
        0x17 => Code::Digit5,
        0x16 => Code::Digit6,
        0x1A => Code::Digit7,
        0x1C => Code::Digit8,
        0x19 => Code::Digit9,
        0x31 => Code::Space,
        0x30 => Code::Tab,
        0x24 => Code::Enter,
        0x35 => Code::Escape,
        0x33 => Code::Backspace,
        0x75 => Code::Delete,
        0x73 => Code::Home,
        0x77 => Code::End,
        0x74 => Code::PageUp,
        0x79 => Code::PageDown,
        0x7B => Code::ArrowLeft,
        0x7C => Code::ArrowRight,
        0x7E => Code::ArrowUp,
        0x7D => Code::ArrowDown,
        0x1B => Code::Minus,
        0x18 => Code::Equal,
        0x21 => Code::BracketLeft,
        0x1E => Code::BracketRight,
        0x29 => Code::Semicolon,
        0x27 => Code::Quote,
        0x2A => Code::Backslash,
        0x2B => Code::Comma,
        0x2F => Code::Period,
        0x2C => Code::Slash,
        0x32 => Code::Backquote,
        0x7A => Code::F1,
        0x78 => Code::F2,
        0x63 => Code::F3,
        0x76 => Code::F4,
        0x60 => Code::F5,
        0x61 => Code::F6,
        0x62 => Code::F7,
        0x64 => Code::F8,
        0x65 => Code::F9,
        0x6D => Code::F10,
        0x67 => Code::F11,
        0x6F => Code::F12,
        0x69 => Code::F13,
        0x6B => Code::F14,
        0x71 => Code::F15,
        0x6A => Code::F16,
        0x40 => Code::F17,
        0x4F => Code::F18,
        0x50 => Code::F19,
        0x5A => Code::F20,
        _ => return None,
    };

    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_standard_key_codes_to_key_identifiers() {
        assert_eq!(key_code_to_code(0x12), Some(Code::Digit1));
        assert_eq!(key_code_to_code(0x00), Some(Code::KeyA));
        assert_eq!(key_code_to_code(0x31), Some(Code::Space));
        assert_eq!(key_code_to_code(0xFF), None);
    }

    #[test]
    fn maps_modifier_key_codes_to_per_side_slots() {
        assert_eq!(
            modifier_slot(KEY_CODE_LEFT_ALT),
            Some((ModifierFamily::Alt, ModifierSide::Left, NX_DEVICELALTKEYMASK))
        );
        assert_eq!(
            modifier_slot(KEY_CODE_RIGHT_CONTROL),
            Some((
                ModifierFamily::Ctrl,
                ModifierSide::Right,
                NX_DEVICERCTLKEYMASK
            ))
        );

        // Fn key keycode is deliberately untracked.
        assert_eq!(modifier_slot(0x3F), None);
    }

    #[test]
    fn flags_bit_decides_press_versus_release() {
        assert_eq!(
            flags_transition(NX_DEVICELALTKEYMASK, NX_DEVICELALTKEYMASK),
            KeyTransition::Pressed
        );
        assert_eq!(
            flags_transition(
                NX_DEVICELALTKEYMASK,
                NX_DEVICERSHIFTKEYMASK | NX_DEVICELCMDKEYMASK
            ),
            KeyTransition::Released
        );
    }
}
