use anyhow::{anyhow, Context, Result};
use global_hotkey::{
    hotkey::{Code, HotKey, Modifiers},
    GlobalHotKeyEvent, GlobalHotKeyManager,
};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::HotkeyConfig;

/// Logical gesture events produced by the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// First key-down of the held combo
    Pressed,
    /// First key-up after the combo was fully released
    Released,
}

/// Collapses OS auto-repeat into a single Pressed/Released pair per hold.
///
/// Repeat-fire press events while the combo is held are dropped, as is a
/// release with no preceding press.
#[derive(Debug, Default)]
pub struct Debouncer {
    held: bool,
}

impl Debouncer {
    /// Feed a raw key-down; returns the event to deliver, if any
    pub fn press(&mut self) -> Option<HotkeyEvent> {
        if self.held {
            debug!("repeat press while held (ignored)");
            return None;
        }
        self.held = true;
        Some(HotkeyEvent::Pressed)
    }

    /// Feed a raw key-up; returns the event to deliver, if any
    pub fn release(&mut self) -> Option<HotkeyEvent> {
        if !self.held {
            debug!("release without press (ignored)");
            return None;
        }
        self.held = false;
        Some(HotkeyEvent::Released)
    }
}

/// Global hotkey listener.
///
/// Registers the configured combo with the OS and translates raw hotkey
/// events into debounced [`HotkeyEvent`]s. Reconfiguration takes effect only
/// after the process restarts and the listener is re-registered.
pub struct HotkeyManager {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
    debouncer: Mutex<Debouncer>,
}

impl HotkeyManager {
    /// Create and register the global hotkey from config
    ///
    /// # Errors
    /// Returns error if the config names no key, a token is unknown, or OS
    /// registration fails.
    pub fn new(config: &HotkeyConfig) -> Result<Self> {
        let manager = GlobalHotKeyManager::new().context("failed to create hotkey manager")?;

        let modifiers = parse_modifiers(&config.modifiers)?;
        let key = config
            .keys
            .first()
            .ok_or_else(|| anyhow!("no hotkey key configured"))?;
        let code = parse_key(key)?;

        let hotkey = HotKey::new(Some(modifiers), code);
        manager
            .register(hotkey)
            .context("failed to register hotkey")?;

        info!("registered hotkey: {:?} + {}", config.modifiers, key);

        Ok(Self {
            manager,
            hotkey,
            debouncer: Mutex::new(Debouncer::default()),
        })
    }

    /// Translate a raw event from the global channel into a gesture event.
    ///
    /// Events for other hotkeys and auto-repeat duplicates yield `None`.
    pub fn handle_event(&self, event: GlobalHotKeyEvent) -> Option<HotkeyEvent> {
        if event.id != self.hotkey.id() {
            return None;
        }

        let mut debouncer = self.debouncer.lock().unwrap();
        match event.state {
            global_hotkey::HotKeyState::Pressed => debouncer.press(),
            global_hotkey::HotKeyState::Released => debouncer.release(),
        }
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        if let Err(e) = self.manager.unregister(self.hotkey) {
            tracing::error!("failed to unregister hotkey: {}", e);
        }
    }
}

fn parse_modifiers(modifiers: &[String]) -> Result<Modifiers> {
    let mut result = Modifiers::empty();
    for modifier in modifiers {
        match modifier.to_ascii_lowercase().as_str() {
            "cmd" | "command" | "super" => result |= Modifiers::SUPER,
            "ctrl" | "control" => result |= Modifiers::CONTROL,
            "alt" | "option" => result |= Modifiers::ALT,
            "shift" => result |= Modifiers::SHIFT,
            _ => return Err(anyhow!("unknown modifier: {}", modifier)),
        }
    }
    Ok(result)
}

fn parse_key(key: &str) -> Result<Code> {
    match key.to_ascii_lowercase().as_str() {
        "a" => Ok(Code::KeyA),
        "b" => Ok(Code::KeyB),
        "c" => Ok(Code::KeyC),
        "d" => Ok(Code::KeyD),
        "e" => Ok(Code::KeyE),
        "f" => Ok(Code::KeyF),
        "g" => Ok(Code::KeyG),
        "h" => Ok(Code::KeyH),
        "i" => Ok(Code::KeyI),
        "j" => Ok(Code::KeyJ),
        "k" => Ok(Code::KeyK),
        "l" => Ok(Code::KeyL),
        "m" => Ok(Code::KeyM),
        "n" => Ok(Code::KeyN),
        "o" => Ok(Code::KeyO),
        "p" => Ok(Code::KeyP),
        "q" => Ok(Code::KeyQ),
        "r" => Ok(Code::KeyR),
        "s" => Ok(Code::KeyS),
        "t" => Ok(Code::KeyT),
        "u" => Ok(Code::KeyU),
        "v" => Ok(Code::KeyV),
        "w" => Ok(Code::KeyW),
        "x" => Ok(Code::KeyX),
        "y" => Ok(Code::KeyY),
        "z" => Ok(Code::KeyZ),
        "0" => Ok(Code::Digit0),
        "1" => Ok(Code::Digit1),
        "2" => Ok(Code::Digit2),
        "3" => Ok(Code::Digit3),
        "4" => Ok(Code::Digit4),
        "5" => Ok(Code::Digit5),
        "6" => Ok(Code::Digit6),
        "7" => Ok(Code::Digit7),
        "8" => Ok(Code::Digit8),
        "9" => Ok(Code::Digit9),
        "space" | " " => Ok(Code::Space),
        "return" | "enter" => Ok(Code::Enter),
        "escape" | "esc" => Ok(Code::Escape),
        "f1" => Ok(Code::F1),
        "f2" => Ok(Code::F2),
        "f3" => Ok(Code::F3),
        "f4" => Ok(Code::F4),
        "f5" => Ok(Code::F5),
        "f6" => Ok(Code::F6),
        "f7" => Ok(Code::F7),
        "f8" => Ok(Code::F8),
        "f9" => Ok(Code::F9),
        "f10" => Ok(Code::F10),
        "f11" => Ok(Code::F11),
        "f12" => Ok(Code::F12),
        _ => Err(anyhow!("unsupported key: {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debouncer_drops_repeat_presses() {
        let mut debouncer = Debouncer::default();
        assert_eq!(debouncer.press(), Some(HotkeyEvent::Pressed));
        // OS auto-repeat while held
        assert_eq!(debouncer.press(), None);
        assert_eq!(debouncer.press(), None);
        assert_eq!(debouncer.release(), Some(HotkeyEvent::Released));
    }

    #[test]
    fn test_debouncer_drops_release_without_press() {
        let mut debouncer = Debouncer::default();
        assert_eq!(debouncer.release(), None);
    }

    #[test]
    fn test_debouncer_full_cycles() {
        let mut debouncer = Debouncer::default();
        for _ in 0..3 {
            assert_eq!(debouncer.press(), Some(HotkeyEvent::Pressed));
            assert_eq!(debouncer.release(), Some(HotkeyEvent::Released));
        }
    }

    #[test]
    fn test_parse_modifiers_lowercase_names() {
        let mods = parse_modifiers(&["cmd".to_owned(), "shift".to_owned()]).unwrap();
        assert!(mods.contains(Modifiers::SUPER));
        assert!(mods.contains(Modifiers::SHIFT));
        assert!(!mods.contains(Modifiers::CONTROL));
    }

    #[test]
    fn test_parse_modifiers_aliases() {
        let mods = parse_modifiers(&["Control".to_owned(), "Option".to_owned()]).unwrap();
        assert!(mods.contains(Modifiers::CONTROL));
        assert!(mods.contains(Modifiers::ALT));
    }

    #[test]
    fn test_parse_modifiers_unknown() {
        assert!(parse_modifiers(&["hyper".to_owned()]).is_err());
    }

    #[test]
    fn test_parse_key_variants() {
        assert!(matches!(parse_key("r"), Ok(Code::KeyR)));
        assert!(matches!(parse_key("R"), Ok(Code::KeyR)));
        assert!(matches!(parse_key("7"), Ok(Code::Digit7)));
        assert!(matches!(parse_key("space"), Ok(Code::Space)));
        assert!(matches!(parse_key("esc"), Ok(Code::Escape)));
        assert!(matches!(parse_key("f12"), Ok(Code::F12)));
        assert!(parse_key("??").is_err());
    }
}
