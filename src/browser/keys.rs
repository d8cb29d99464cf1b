// Key-name lookup for CDP key event dispatch

/// CDP modifier bitmask values.
pub const MOD_ALT: i64 = 1;
pub const MOD_CTRL: i64 = 2;
pub const MOD_META: i64 = 4;
pub const MOD_SHIFT: i64 = 8;

/// Everything needed to build a DispatchKeyEvent for one named key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub key: &'static str,
    pub code: &'static str,
    pub key_code: i64,
    /// Text produced by the key, when it produces any.
    pub text: Option<&'static str>,
}

pub fn lookup(name: &str) -> Option<KeySpec> {
    let spec = match name {
        "Enter" => KeySpec { key: "Enter", code: "Enter", key_code: 13, text: Some("\r") },
        "Tab" => KeySpec { key: "Tab", code: "Tab", key_code: 9, text: None },
        "Escape" => KeySpec { key: "Escape", code: "Escape", key_code: 27, text: None },
        "Backspace" => KeySpec { key: "Backspace", code: "Backspace", key_code: 8, text: None },
        "Delete" => KeySpec { key: "Delete", code: "Delete", key_code: 46, text: None },
        "Space" | " " => KeySpec { key: " ", code: "Space", key_code: 32, text: Some(" ") },
        "ArrowUp" => KeySpec { key: "ArrowUp", code: "ArrowUp", key_code: 38, text: None },
        "ArrowDown" => KeySpec { key: "ArrowDown", code: "ArrowDown", key_code: 40, text: None },
        "ArrowLeft" => KeySpec { key: "ArrowLeft", code: "ArrowLeft", key_code: 37, text: None },
        "ArrowRight" => KeySpec { key: "ArrowRight", code: "ArrowRight", key_code: 39, text: None },
        "Home" => KeySpec { key: "Home", code: "Home", key_code: 36, text: None },
        "End" => KeySpec { key: "End", code: "End", key_code: 35, text: None },
        "PageUp" => KeySpec { key: "PageUp", code: "PageUp", key_code: 33, text: None },
        "PageDown" => KeySpec { key: "PageDown", code: "PageDown", key_code: 34, text: None },
        _ => return None,
    };
    Some(spec)
}

/// Split "Control+a" into (modifier mask, bare key name).
pub fn parse_combo(combo: &str) -> (i64, &str) {
    let mut modifiers = 0;
    let mut key = combo;
    for part in combo.split('+') {
        match part {
            "Control" | "Ctrl" => modifiers |= MOD_CTRL,
            "Alt" => modifiers |= MOD_ALT,
            "Meta" | "Cmd" => modifiers |= MOD_META,
            "Shift" => modifiers |= MOD_SHIFT,
            other => key = other,
        }
    }
    // "+" itself ("Shift++") would confuse the split; treat the trailing
    // empty part as a literal plus.
    if combo.ends_with('+') && key.is_empty() {
        key = "+";
    }
    (modifiers, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_resolve() {
        assert_eq!(lookup("Enter").unwrap().key_code, 13);
        assert_eq!(lookup("Enter").unwrap().text, Some("\r"));
        assert_eq!(lookup("Escape").unwrap().key_code, 27);
        assert!(lookup("Bogus").is_none());
    }

    #[test]
    fn combos_parse_modifiers() {
        assert_eq!(parse_combo("Control+a"), (MOD_CTRL, "a"));
        assert_eq!(parse_combo("Meta+a"), (MOD_META, "a"));
        assert_eq!(parse_combo("Control+Shift+Tab"), (MOD_CTRL | MOD_SHIFT, "Tab"));
        assert_eq!(parse_combo("Enter"), (0, "Enter"));
    }
}
