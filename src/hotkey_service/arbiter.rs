use std::{fmt, str::FromStr};

use tauri_plugin_global_shortcut::{Code, Modifiers, Shortcut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierFamily {
    Alt,
    Ctrl,
    Shift,
    Meta,
}

impl ModifierFamily {
    fn parse(token: &str) -> Option<Self> {
        let normalized = normalize_modifier_token(token);

        let family = match normalized.as_str() {
            "ALT" | "OPTION" => Self::Alt,
            "CTRL" | "CONTROL" => Self::Ctrl,
            "SHIFT" => Self::Shift,
            "META" | "CMD" | "COMMAND" | "SUPER" | "OS" => Self::Meta,
            "COMMANDORCONTROL" | "COMMANDORCTRL" | "CMDORCTRL" | "CMDORCONTROL" => {
                #[cfg(target_os = "macos")]
                {
                    Self::Meta
                }
                #[cfg(not(target_os = "macos"))]
                {
                    Self::Ctrl
                }
            }
            _ => return None,
        };

        Some(family)
    }

    fn as_token(self) -> &'static str {
        match self {
            Self::Alt => "Alt",
            Self::Ctrl => "Ctrl",
            Self::Shift => "Shift",
            Self::Meta => "Cmd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierSide {
    Left,
    Right,
}

/// How one raw key relates to the registered combo. The OS listener
/// classifies every event into one of these before the arbiter sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Modifier(ModifierFamily, ModifierSide),
    ComboKey,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    ComboArmed,
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct HeldModifiers {
    l_alt: bool,
    r_alt: bool,
    l_shift: bool,
    r_shift: bool,
    l_ctrl: bool,
    r_ctrl: bool,
    l_meta: bool,
    r_meta: bool,
}

impl HeldModifiers {
    fn set(&mut self, family: ModifierFamily, side: ModifierSide, held: bool) {
        let slot = match (family, side) {
            (ModifierFamily::Alt, ModifierSide::Left) => &mut self.l_alt,
            (ModifierFamily::Alt, ModifierSide::Right) => &mut self.r_alt,
            (ModifierFamily::Shift, ModifierSide::Left) => &mut self.l_shift,
            (ModifierFamily::Shift, ModifierSide::Right) => &mut self.r_shift,
            (ModifierFamily::Ctrl, ModifierSide::Left) => &mut self.l_ctrl,
            (ModifierFamily::Ctrl, ModifierSide::Right) => &mut self.r_ctrl,
            (ModifierFamily::Meta, ModifierSide::Left) => &mut self.l_meta,
            (ModifierFamily::Meta, ModifierSide::Right) => &mut self.r_meta,
        };
        *slot = held;
    }

    fn family_held(&self, family: ModifierFamily) -> bool {
        match family {
            ModifierFamily::Alt => self.l_alt || self.r_alt,
            ModifierFamily::Ctrl => self.l_ctrl || self.r_ctrl,
            ModifierFamily::Shift => self.l_shift || self.r_shift,
            ModifierFamily::Meta => self.l_meta || self.r_meta,
        }
    }

    fn any_family_other_than(&self, family: ModifierFamily) -> bool {
        let alt = self.l_alt || self.r_alt;
        let ctrl = self.l_ctrl || self.r_ctrl;
        let shift = self.l_shift || self.r_shift;
        let meta = self.l_meta || self.r_meta;

        match family {
            ModifierFamily::Alt => ctrl || shift || meta,
            ModifierFamily::Ctrl => alt || shift || meta,
            ModifierFamily::Shift => alt || ctrl || meta,
            ModifierFamily::Meta => alt || ctrl || shift,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboPattern {
    modifier: ModifierFamily,
    key: Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComboParseError {
    EmptyCombo,
    EmptyToken,
    MissingModifier,
    MissingKey,
    MultipleModifiers,
    InvalidKeyToken(String),
}

impl fmt::Display for ComboParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCombo => f.write_str("Combo cannot be empty"),
            Self::EmptyToken => f.write_str("Combo contains an empty token"),
            Self::MissingModifier => f.write_str("Combo must include a modifier key"),
            Self::MissingKey => f.write_str("Combo must include a non-modifier key"),
            Self::MultipleModifiers => {
                f.write_str("Combo supports exactly one modifier family")
            }
            Self::InvalidKeyToken(token) => write!(f, "Unsupported key token `{token}`"),
        }
    }
}

impl std::error::Error for ComboParseError {}

impl ComboPattern {
    pub fn parse(combo: &str) -> Result<Self, ComboParseError> {
        combo.parse()
    }

    pub fn modifier(&self) -> ModifierFamily {
        self.modifier
    }

    pub fn key(&self) -> Code {
        self.key
    }

    pub fn to_global_shortcut(&self) -> Shortcut {
        let modifiers = match self.modifier {
            ModifierFamily::Alt => Modifiers::ALT,
            ModifierFamily::Ctrl => Modifiers::CONTROL,
            ModifierFamily::Shift => Modifiers::SHIFT,
            ModifierFamily::Meta => Modifiers::SUPER,
        };

        Shortcut::new(Some(modifiers), self.key)
    }
}

impl Default for ComboPattern {
    fn default() -> Self {
        Self {
            modifier: ModifierFamily::Alt,
            key: Code::Digit1,
        }
    }
}

impl fmt::Display for ComboPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}",
            self.modifier.as_token(),
            format_key_token(self.key)
        )
    }
}

impl FromStr for ComboPattern {
    type Err = ComboParseError;

    fn from_str(combo: &str) -> Result<Self, Self::Err> {
        if combo.trim().is_empty() {
            return Err(ComboParseError::EmptyCombo);
        }

        let mut modifier = None;
        let mut key = None;

        for raw_token in combo.split('+') {
            let token = raw_token.trim();
            if token.is_empty() {
                return Err(ComboParseError::EmptyToken);
            }

            if let Some(family) = ModifierFamily::parse(token) {
                if modifier.is_some() {
                    return Err(ComboParseError::MultipleModifiers);
                }
                modifier = Some(family);
                continue;
            }

            key = Some(parse_key_token(token)?);
        }

        let modifier = modifier.ok_or(ComboParseError::MissingModifier)?;
        let key = key.ok_or(ComboParseError::MissingKey)?;

        Ok(Self { modifier, key })
    }
}

/// Decides whether a stream of raw key events constitutes a valid activation.
///
/// A combo press fires only while no modifier family outside the combo is
/// held; a fired activation stays consumed until the combo key is released,
/// so OS autorepeat cannot fire twice.
#[derive(Debug, Clone)]
pub struct ComboArbiter {
    pattern: ComboPattern,
    held: HeldModifiers,
    combo_key_down: bool,
    activation_consumed: bool,
}

impl ComboArbiter {
    pub fn new(pattern: ComboPattern) -> Self {
        Self {
            pattern,
            held: HeldModifiers::default(),
            combo_key_down: false,
            activation_consumed: false,
        }
    }

    pub fn pattern(&self) -> ComboPattern {
        self.pattern
    }

    /// Swaps the registered combo. Physically held modifiers stay tracked;
    /// the combo-key latch is cleared because it belongs to the old key.
    pub fn set_pattern(&mut self, pattern: ComboPattern) {
        self.pattern = pattern;
        self.combo_key_down = false;
        self.activation_consumed = false;
    }

    pub fn state(&self) -> ArbiterState {
        if self.suppressed() {
            return ArbiterState::Suppressed;
        }

        if self.combo_key_down
            && self.held.family_held(self.pattern.modifier)
            && !self.activation_consumed
        {
            return ArbiterState::ComboArmed;
        }

        ArbiterState::Idle
    }

    /// Feeds one raw key event; returns `true` when activation should fire.
    pub fn handle_key(&mut self, role: KeyRole, transition: KeyTransition) -> bool {
        match (role, transition) {
            (KeyRole::Modifier(family, side), KeyTransition::Pressed) => {
                self.held.set(family, side, true);
            }
            (KeyRole::Modifier(family, side), KeyTransition::Released) => {
                self.held.set(family, side, false);
            }
            (KeyRole::ComboKey, KeyTransition::Pressed) => {
                let repeat = self.combo_key_down;
                self.combo_key_down = true;

                if !repeat
                    && !self.suppressed()
                    && self.held.family_held(self.pattern.modifier)
                {
                    self.activation_consumed = true;
                    return true;
                }
            }
            (KeyRole::ComboKey, KeyTransition::Released) => {
                self.combo_key_down = false;
                self.activation_consumed = false;
            }
            (KeyRole::Other, _) => {}
        }

        false
    }

    fn suppressed(&self) -> bool {
        self.held.any_family_other_than(self.pattern.modifier)
    }
}

fn normalize_modifier_token(token: &str) -> String {
    token
        .chars()
        .filter(|character| character.is_ascii_alphanumeric())
        .map(|character| character.to_ascii_uppercase())
        .collect()
}

fn parse_key_token(token: &str) -> Result<Code, ComboParseError> {
    token
        .parse::<Shortcut>()
        .map(|shortcut| shortcut.key)
        .map_err(|_| ComboParseError::InvalidKeyToken(token.to_string()))
}

fn format_key_token(key: Code) -> String {
    let key_name = key.to_string();

    if let Some(letter) = key_name.strip_prefix("Key") {
        if letter.len() == 1 {
            return letter.to_string();
        }
    }

    if let Some(digit) = key_name.strip_prefix("Digit") {
        if digit.len() == 1 {
            return digit.to_string();
        }
    }

    key_name
}
