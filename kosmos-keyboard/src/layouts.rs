//! Built-in layouts

use crate::error::LayoutError;
use crate::key_id::KeyId;
use crate::layout::KeyboardLayout;

/// Names accepted by [`builtin`]
pub const BUILTIN_LAYOUTS: &[&str] = &["media-dual", "galvanic-media", "gtech-tkl"];

/// Look up a built-in layout by name
pub fn builtin(name: &str) -> Result<KeyboardLayout, LayoutError> {
    match name {
        "media-dual" => Ok(media_dual()),
        "galvanic-media" => Ok(galvanic_media()),
        "gtech-tkl" => Ok(gtech_tkl()),
        _ => Err(LayoutError::UnknownLayout(name.to_string())),
    }
}

/// Small dual-technology board: media keys on the galvanic matrix, a few
/// letters on the analog chain
pub fn media_dual() -> KeyboardLayout {
    KeyboardLayout::new("media-dual")
        .with_cell(KeyId::PLAY_PAUSE, 0, 0)
        .with_cell(KeyId::KEYBOARD_MUTE, 1, 0)
        .with_cell(KeyId::NEXT_TRACK, 2, 0)
        .with_cell(KeyId::PREV_TRACK, 3, 0)
        .with_cell(KeyId::VOLUME_UP, 4, 0)
        .with_cell(KeyId::VOLUME_DOWN, 5, 0)
        .with_cell(KeyId::FN_KEY, 0, 1)
        .with_cell(KeyId::KEYBOARD_LEFT_CONTROL, 1, 1)
        .with_cell(KeyId::KEYBOARD_LEFT_ALT, 2, 1)
        .with_cell(KeyId::KEYBOARD_DELETE_FORWARD, 3, 1)
        .with_cell(KeyId::KEYBOARD_F1, 4, 1)
        .with_cell(KeyId::KEYBOARD_F2, 5, 1)
        .with_chain(KeyId::KEYBOARD_A, 0)
        .with_chain(KeyId::KEYBOARD_B, 1)
        .with_chain(KeyId::KEYBOARD_C, 2)
        .with_chain(KeyId::KEYBOARD_D, 3)
        .with_chain(KeyId::KEYBOARD_SPACE_BAR, 4)
        .with_fn_key(KeyId::FN_KEY)
        .with_fn_alias(KeyId::FN_KEYBOARD_F1, KeyId::KEYBOARD_F1)
        .with_fn_alias(KeyId::FN_KEYBOARD_F2, KeyId::KEYBOARD_F2)
}

/// Media remote with only galvanic keys
pub fn galvanic_media() -> KeyboardLayout {
    let keys = [
        KeyId::PLAY_PAUSE,
        KeyId::STOP,
        KeyId::NEXT_TRACK,
        KeyId::PREV_TRACK,
        KeyId::VOLUME_UP,
        KeyId::VOLUME_DOWN,
        KeyId::KEYBOARD_MUTE,
        KeyId::MIC_MUTE,
        KeyId::HOST_1,
        KeyId::HOST_2,
        KeyId::HOST_3,
        KeyId::SIGNAL_N_POWER_GOOD,
    ];
    keys.iter()
        .enumerate()
        .fold(KeyboardLayout::new("galvanic-media"), |layout, (i, &key)| {
            layout.with_cell(key, (i % 4) as u8, (i / 4) as u8)
        })
}

/// Tenkeyless analog board: alphanumerics on the optical chain, modifiers,
/// function row and navigation on the galvanic matrix
pub fn gtech_tkl() -> KeyboardLayout {
    let mut layout = KeyboardLayout::new("gtech-tkl");

    let analog = KeyId::ALL
        .iter()
        .copied()
        .filter(|k| (KeyId::KEYBOARD_A..=KeyId::KEYBOARD_0).contains(k))
        .chain([
            KeyId::KEYBOARD_SPACE_BAR,
            KeyId::KEYBOARD_RETURN_ENTER,
            KeyId::KEYBOARD_BACKSPACE,
            KeyId::KEYBOARD_TAB,
        ]);
    for (chain_id, key) in analog.enumerate() {
        layout = layout.with_chain(key, chain_id as u8);
    }

    let galvanic = KeyId::ALL
        .iter()
        .copied()
        .filter(|k| (KeyId::KEYBOARD_F1..=KeyId::KEYBOARD_F12).contains(k))
        .chain([
            KeyId::KEYBOARD_ESCAPE,
            KeyId::KEYBOARD_LEFT_CONTROL,
            KeyId::KEYBOARD_LEFT_SHIFT,
            KeyId::KEYBOARD_LEFT_ALT,
            KeyId::KEYBOARD_LEFT_WIN_OR_OPTION,
            KeyId::KEYBOARD_RIGHT_CONTROL,
            KeyId::KEYBOARD_RIGHT_SHIFT,
            KeyId::KEYBOARD_RIGHT_ALT,
            KeyId::FN_KEY,
            KeyId::KEYBOARD_INSERT,
            KeyId::KEYBOARD_DELETE_FORWARD,
            KeyId::KEYBOARD_HOME,
            KeyId::KEYBOARD_END,
            KeyId::KEYBOARD_PAGE_UP,
            KeyId::KEYBOARD_PAGE_DOWN,
            KeyId::KEYBOARD_LEFT_ARROW,
            KeyId::KEYBOARD_RIGHT_ARROW,
            KeyId::KEYBOARD_UP_ARROW,
            KeyId::KEYBOARD_DOWN_ARROW,
        ]);
    for (i, key) in galvanic.enumerate() {
        layout = layout.with_cell(key, (i % 8) as u8, (i / 8) as u8);
    }

    layout = layout.with_fn_key(KeyId::FN_KEY);
    let fn_row = KeyId::ALL
        .iter()
        .copied()
        .filter(|k| (KeyId::FN_KEYBOARD_F1..=KeyId::FN_KEYBOARD_F12).contains(k));
    let base_row = KeyId::ALL
        .iter()
        .copied()
        .filter(|k| (KeyId::KEYBOARD_F1..=KeyId::KEYBOARD_F12).contains(k));
    for (alias, base) in fn_row.zip(base_row) {
        layout = layout.with_fn_alias(alias, base);
    }
    layout
        .with_fn_alias(KeyId::FN_KEYBOARD_LEFT_ARROW, KeyId::KEYBOARD_HOME)
        .with_fn_alias(KeyId::FN_KEYBOARD_RIGHT_ARROW, KeyId::KEYBOARD_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_validate() {
        for name in BUILTIN_LAYOUTS {
            let layout = builtin(name).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.name, *name);
        }
        assert!(builtin("nope").is_err());
    }

    #[test]
    fn test_media_dual_partition() {
        let layout = media_dual();
        for key in [KeyId::PLAY_PAUSE, KeyId::KEYBOARD_MUTE, KeyId::NEXT_TRACK] {
            assert!(layout.is_galvanic(key));
        }
        for key in [KeyId::KEYBOARD_A, KeyId::KEYBOARD_B] {
            assert!(layout.is_analog(key));
            assert!(!layout.is_galvanic(key));
        }
    }

    #[test]
    fn test_gtech_tkl_shape() {
        let layout = gtech_tkl();
        // 26 letters + 10 digits + 4 editing keys
        assert_eq!(layout.analog_keys().count(), 40);
        assert_eq!(layout.fn_base(KeyId::FN_KEYBOARD_F5), Some(KeyId::KEYBOARD_F5));
    }
}
