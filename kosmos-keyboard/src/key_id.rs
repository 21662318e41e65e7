//! Key identifier catalogue
//!
//! Every physically distinct stimulus a test can drive has one `KeyId`.
//! Identifiers are numbered from 1 in declaration order and new entries are
//! only ever appended, so numbers recorded in old capture logs stay valid.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! key_ids {
    ($first:ident, $($name:ident),* $(,)?) => {
        /// Identifier of one stimulus (button, key, Fn alias, shortcut, signal)
        #[allow(non_camel_case_types)]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            IntoPrimitive, TryFromPrimitive,
        )]
        #[repr(u16)]
        pub enum KeyId {
            $first = 1,
            $($name,)*
        }

        impl KeyId {
            /// All identifiers in numbering order
            pub const ALL: &'static [KeyId] = &[KeyId::$first, $(KeyId::$name,)*];

            /// Canonical upper-case name
            pub fn name(self) -> &'static str {
                match self {
                    KeyId::$first => stringify!($first),
                    $(KeyId::$name => stringify!($name),)*
                }
            }
        }
    };
}

key_ids! {
    // Mouse buttons
    BUTTON_1,
    BUTTON_2,
    BUTTON_3,
    BUTTON_4,
    BUTTON_5,
    BUTTON_6,
    BUTTON_7,
    BUTTON_8,
    BUTTON_9,
    BUTTON_10,
    BUTTON_11,
    BUTTON_12,
    BUTTON_13,
    BUTTON_14,
    BUTTON_15,
    BUTTON_16,

    // Letters
    KEYBOARD_A,
    KEYBOARD_B,
    KEYBOARD_C,
    KEYBOARD_D,
    KEYBOARD_E,
    KEYBOARD_F,
    KEYBOARD_G,
    KEYBOARD_H,
    KEYBOARD_I,
    KEYBOARD_J,
    KEYBOARD_K,
    KEYBOARD_L,
    KEYBOARD_M,
    KEYBOARD_N,
    KEYBOARD_O,
    KEYBOARD_P,
    KEYBOARD_Q,
    KEYBOARD_R,
    KEYBOARD_S,
    KEYBOARD_T,
    KEYBOARD_U,
    KEYBOARD_V,
    KEYBOARD_W,
    KEYBOARD_X,
    KEYBOARD_Y,
    KEYBOARD_Z,

    // Digits
    KEYBOARD_1,
    KEYBOARD_2,
    KEYBOARD_3,
    KEYBOARD_4,
    KEYBOARD_5,
    KEYBOARD_6,
    KEYBOARD_7,
    KEYBOARD_8,
    KEYBOARD_9,
    KEYBOARD_0,

    // Main block
    KEYBOARD_RETURN_ENTER,
    KEYBOARD_ESCAPE,
    KEYBOARD_BACKSPACE,
    KEYBOARD_TAB,
    KEYBOARD_SPACE_BAR,
    KEYBOARD_DASH_AND_UNDERSCORE,
    KEYBOARD_EQUAL_AND_PLUS,
    KEYBOARD_LEFT_BRACKET_AND_BRACE,
    KEYBOARD_RIGHT_BRACKET_AND_BRACE,
    KEYBOARD_BACKSLASH_AND_PIPE,
    KEYBOARD_SEMICOLON_AND_COLON,
    KEYBOARD_APOSTROPHE_AND_QUOTE,
    KEYBOARD_GRAVE_ACCENT_AND_TILDE,
    KEYBOARD_COMMA_AND_LESS,
    KEYBOARD_PERIOD_AND_GREATER,
    KEYBOARD_FORWARD_SLASH_AND_QUESTION_MARK,
    KEYBOARD_CAPS_LOCK,

    // Function row
    KEYBOARD_F1,
    KEYBOARD_F2,
    KEYBOARD_F3,
    KEYBOARD_F4,
    KEYBOARD_F5,
    KEYBOARD_F6,
    KEYBOARD_F7,
    KEYBOARD_F8,
    KEYBOARD_F9,
    KEYBOARD_F10,
    KEYBOARD_F11,
    KEYBOARD_F12,
    KEYBOARD_F13,
    KEYBOARD_F14,
    KEYBOARD_F15,
    KEYBOARD_F16,
    KEYBOARD_F17,
    KEYBOARD_F18,
    KEYBOARD_F19,
    KEYBOARD_F20,
    KEYBOARD_F21,
    KEYBOARD_F22,
    KEYBOARD_F23,
    KEYBOARD_F24,

    // Navigation and editing
    KEYBOARD_PRINT_SCREEN,
    KEYBOARD_SCROLL_LOCK,
    KEYBOARD_PAUSE,
    KEYBOARD_INSERT,
    KEYBOARD_HOME,
    KEYBOARD_PAGE_UP,
    KEYBOARD_DELETE_FORWARD,
    KEYBOARD_END,
    KEYBOARD_PAGE_DOWN,
    KEYBOARD_RIGHT_ARROW,
    KEYBOARD_LEFT_ARROW,
    KEYBOARD_DOWN_ARROW,
    KEYBOARD_UP_ARROW,
    KEYBOARD_APPLICATION,

    // Keypad
    KEYPAD_NUM_LOCK_AND_CLEAR,
    KEYPAD_FORWARD_SLASH,
    KEYPAD_ASTERISK,
    KEYPAD_MINUS,
    KEYPAD_PLUS,
    KEYPAD_ENTER,
    KEYPAD_1_AND_END,
    KEYPAD_2_AND_DOWN_ARROW,
    KEYPAD_3_AND_PAGE_DOWN,
    KEYPAD_4_AND_LEFT_ARROW,
    KEYPAD_5,
    KEYPAD_6_AND_RIGHT_ARROW,
    KEYPAD_7_AND_HOME,
    KEYPAD_8_AND_UP_ARROW,
    KEYPAD_9_AND_PAGE_UP,
    KEYPAD_0_AND_INSERT,
    KEYPAD_PERIOD_AND_DELETE,

    // Modifiers
    KEYBOARD_LEFT_CONTROL,
    KEYBOARD_LEFT_SHIFT,
    KEYBOARD_LEFT_ALT,
    KEYBOARD_LEFT_WIN_OR_OPTION,
    KEYBOARD_RIGHT_CONTROL,
    KEYBOARD_RIGHT_SHIFT,
    KEYBOARD_RIGHT_ALT,
    KEYBOARD_RIGHT_WIN_OR_OPTION,
    FN_KEY,
    FN_LOCK,

    // Fn-layer aliases
    FN_KEYBOARD_F1,
    FN_KEYBOARD_F2,
    FN_KEYBOARD_F3,
    FN_KEYBOARD_F4,
    FN_KEYBOARD_F5,
    FN_KEYBOARD_F6,
    FN_KEYBOARD_F7,
    FN_KEYBOARD_F8,
    FN_KEYBOARD_F9,
    FN_KEYBOARD_F10,
    FN_KEYBOARD_F11,
    FN_KEYBOARD_F12,
    FN_KEYBOARD_ESCAPE,
    FN_KEYBOARD_INSERT,
    FN_KEYBOARD_DELETE_FORWARD,
    FN_KEYBOARD_LEFT_ARROW,
    FN_KEYBOARD_RIGHT_ARROW,
    FN_KEYBOARD_UP_ARROW,
    FN_KEYBOARD_DOWN_ARROW,
    FN_KEYBOARD_SPACE_BAR,

    // International
    KEYBOARD_NON_US_BACKSLASH_AND_PIPE,
    KEYBOARD_NON_US_HASH_AND_TILDE,
    KEYBOARD_INTERNATIONAL_1,
    KEYBOARD_INTERNATIONAL_2,
    KEYBOARD_INTERNATIONAL_3,
    KEYBOARD_INTERNATIONAL_4,
    KEYBOARD_INTERNATIONAL_5,
    KEYBOARD_LANG_1,
    KEYBOARD_LANG_2,
    KEYBOARD_LANG_3,
    KEYBOARD_LANG_4,
    KEYBOARD_LANG_5,

    // Compound shortcuts
    COMPOUND_CTRL_ALT_DEL,
    COMPOUND_ALT_TAB,
    COMPOUND_ALT_F4,
    COMPOUND_WIN_L,
    COMPOUND_WIN_D,
    COMPOUND_CTRL_C,
    COMPOUND_CTRL_V,
    COMPOUND_CTRL_SHIFT_ESC,

    // Multimedia and system
    PLAY_PAUSE,
    STOP,
    NEXT_TRACK,
    PREV_TRACK,
    VOLUME_UP,
    VOLUME_DOWN,
    KEYBOARD_MUTE,
    MIC_MUTE,
    BRIGHTNESS_UP,
    BRIGHTNESS_DOWN,
    BACKLIGHT_UP,
    BACKLIGHT_DOWN,
    BACKLIGHT_TOGGLE,
    CALCULATOR,
    SEARCH,
    EMOJI,
    SCREEN_CAPTURE,
    DICTATION,
    SHOW_DESKTOP,
    APP_SWITCH,
    LOCK_SCREEN,
    POWER,

    // Host switching
    HOST_1,
    HOST_2,
    HOST_3,
    CONNECT_BUTTON,

    // Gaming
    G_1,
    G_2,
    G_3,
    G_4,
    G_5,
    G_6,
    G_7,
    G_8,
    G_9,
    G_10,
    G_11,
    G_12,
    M_1,
    M_2,
    M_3,
    MR,
    GAME_MODE,

    // Rollers
    ROLLER_A_UP,
    ROLLER_A_DOWN,
    ROLLER_B_UP,
    ROLLER_B_DOWN,

    // Signal lines
    SIGNAL_N_POWER_GOOD,
    SIGNAL_N_CHARGING,
    SIGNAL_USB_VBUS,
    SIGNAL_LID_CLOSED,
}

/// One scripted step of a compound shortcut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundStep {
    Press(KeyId),
    Release(KeyId),
}

use CompoundStep::{Press, Release};

const CTRL_ALT_DEL: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_CONTROL),
    Press(KeyId::KEYBOARD_LEFT_ALT),
    Press(KeyId::KEYBOARD_DELETE_FORWARD),
    Release(KeyId::KEYBOARD_DELETE_FORWARD),
    Release(KeyId::KEYBOARD_LEFT_ALT),
    Release(KeyId::KEYBOARD_LEFT_CONTROL),
];

const ALT_TAB: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_ALT),
    Press(KeyId::KEYBOARD_TAB),
    Release(KeyId::KEYBOARD_TAB),
    Release(KeyId::KEYBOARD_LEFT_ALT),
];

const ALT_F4: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_ALT),
    Press(KeyId::KEYBOARD_F4),
    Release(KeyId::KEYBOARD_F4),
    Release(KeyId::KEYBOARD_LEFT_ALT),
];

const WIN_L: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_WIN_OR_OPTION),
    Press(KeyId::KEYBOARD_L),
    Release(KeyId::KEYBOARD_L),
    Release(KeyId::KEYBOARD_LEFT_WIN_OR_OPTION),
];

const WIN_D: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_WIN_OR_OPTION),
    Press(KeyId::KEYBOARD_D),
    Release(KeyId::KEYBOARD_D),
    Release(KeyId::KEYBOARD_LEFT_WIN_OR_OPTION),
];

const CTRL_C: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_CONTROL),
    Press(KeyId::KEYBOARD_C),
    Release(KeyId::KEYBOARD_C),
    Release(KeyId::KEYBOARD_LEFT_CONTROL),
];

const CTRL_V: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_CONTROL),
    Press(KeyId::KEYBOARD_V),
    Release(KeyId::KEYBOARD_V),
    Release(KeyId::KEYBOARD_LEFT_CONTROL),
];

const CTRL_SHIFT_ESC: &[CompoundStep] = &[
    Press(KeyId::KEYBOARD_LEFT_CONTROL),
    Press(KeyId::KEYBOARD_LEFT_SHIFT),
    Press(KeyId::KEYBOARD_ESCAPE),
    Release(KeyId::KEYBOARD_ESCAPE),
    Release(KeyId::KEYBOARD_LEFT_SHIFT),
    Release(KeyId::KEYBOARD_LEFT_CONTROL),
];

impl KeyId {
    /// Look up an identifier by its canonical name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    /// Numeric identifier
    pub fn id(self) -> u16 {
        self.into()
    }

    /// Scripted press/release steps for compound shortcuts
    pub fn compound_sequence(self) -> Option<&'static [CompoundStep]> {
        let steps = match self {
            Self::COMPOUND_CTRL_ALT_DEL => CTRL_ALT_DEL,
            Self::COMPOUND_ALT_TAB => ALT_TAB,
            Self::COMPOUND_ALT_F4 => ALT_F4,
            Self::COMPOUND_WIN_L => WIN_L,
            Self::COMPOUND_WIN_D => WIN_D,
            Self::COMPOUND_CTRL_C => CTRL_C,
            Self::COMPOUND_CTRL_V => CTRL_V,
            Self::COMPOUND_CTRL_SHIFT_ESC => CTRL_SHIFT_ESC,
            _ => return None,
        };
        Some(steps)
    }

    pub fn is_compound(self) -> bool {
        self.compound_sequence().is_some()
    }

    pub fn is_mouse_button(self) -> bool {
        (Self::BUTTON_1..=Self::BUTTON_16).contains(&self)
    }

    pub fn is_signal(self) -> bool {
        self.name().starts_with("SIGNAL_")
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for KeyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("Unknown key id: {}", s))
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name).ok_or_else(|| serde::de::Error::custom(format!("unknown key id `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_starts_at_one() {
        assert_eq!(KeyId::BUTTON_1.id(), 1);
        assert_eq!(KeyId::BUTTON_16.id(), 16);
        assert_eq!(KeyId::KEYBOARD_A.id(), 17);
        assert_eq!(KeyId::ALL.len(), KeyId::SIGNAL_LID_CLOSED.id() as usize);
    }

    #[test]
    fn test_all_is_dense_and_ordered() {
        for (i, key) in KeyId::ALL.iter().enumerate() {
            assert_eq!(key.id() as usize, i + 1);
            assert_eq!(KeyId::try_from(key.id()).unwrap(), *key);
        }
        assert!(KeyId::try_from(0u16).is_err());
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(KeyId::PLAY_PAUSE.name(), "PLAY_PAUSE");
        assert_eq!(KeyId::from_name("keyboard_mute"), Some(KeyId::KEYBOARD_MUTE));
        assert_eq!("NEXT_TRACK".parse::<KeyId>().unwrap(), KeyId::NEXT_TRACK);
        assert!(KeyId::from_name("KEYBOARD_Ω").is_none());
    }

    #[test]
    fn test_compound_sequences_are_balanced() {
        for key in KeyId::ALL.iter().filter(|k| k.is_compound()) {
            let steps = key.compound_sequence().unwrap();
            let presses = steps.iter().filter(|s| matches!(s, Press(_))).count();
            assert_eq!(presses * 2, steps.len(), "{key}");
            // Last press is released first
            let last_press = steps[presses - 1];
            if let Press(k) = last_press {
                assert_eq!(steps[presses], Release(k));
            }
        }
        assert!(KeyId::KEYBOARD_A.compound_sequence().is_none());
    }

    #[test]
    fn test_classification() {
        assert!(KeyId::BUTTON_3.is_mouse_button());
        assert!(!KeyId::KEYBOARD_A.is_mouse_button());
        assert!(KeyId::SIGNAL_N_POWER_GOOD.is_signal());
    }
}
