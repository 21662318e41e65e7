//! Modifier key groups

use crate::key_id::KeyId;

/// Modifier groups a test can ask about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierGroup {
    Shift,
    Ctrl,
    Alt,
    Win,
    /// macOS command; same physical keys as `Win`
    Cmd,
    Fn,
}

impl ModifierGroup {
    pub const ALL: [ModifierGroup; 6] = [
        Self::Shift,
        Self::Ctrl,
        Self::Alt,
        Self::Win,
        Self::Cmd,
        Self::Fn,
    ];

    /// Keys belonging to this group
    pub fn keys(self) -> &'static [KeyId] {
        match self {
            Self::Shift => &[KeyId::KEYBOARD_LEFT_SHIFT, KeyId::KEYBOARD_RIGHT_SHIFT],
            Self::Ctrl => &[KeyId::KEYBOARD_LEFT_CONTROL, KeyId::KEYBOARD_RIGHT_CONTROL],
            Self::Alt => &[KeyId::KEYBOARD_LEFT_ALT, KeyId::KEYBOARD_RIGHT_ALT],
            Self::Win | Self::Cmd => &[
                KeyId::KEYBOARD_LEFT_WIN_OR_OPTION,
                KeyId::KEYBOARD_RIGHT_WIN_OR_OPTION,
            ],
            Self::Fn => &[KeyId::FN_KEY, KeyId::FN_LOCK],
        }
    }

    pub fn contains(self, key: KeyId) -> bool {
        self.keys().contains(&key)
    }

    /// First group containing `key`
    pub fn of(key: KeyId) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.contains(key))
    }
}

impl KeyId {
    /// Check if this key belongs to any modifier group
    pub fn is_modifier(self) -> bool {
        ModifierGroup::of(self).is_some()
    }
}
