use super::load::{default_config_path, resolve_config_path, state_dir};
use super::schema::*;
use std::sync::{Mutex, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

struct EnvGuard {
    key: &'static str,
    old: Option<std::ffi::OsString>,
}

impl EnvGuard {
    fn set(key: &'static str, val: &str) -> Self {
        let old = std::env::var_os(key);
        unsafe {
            std::env::set_var(key, val);
        }
        Self { key, old }
    }

    fn remove(key: &'static str) -> Self {
        let old = std::env::var_os(key);
        unsafe {
            std::env::remove_var(key);
        }
        Self { key, old }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.old.take() {
            Some(v) => unsafe {
                std::env::set_var(self.key, v);
            },
            None => unsafe {
                std::env::remove_var(self.key);
            },
        }
    }
}

#[test]
fn resolve_config_path_prefers_legato_config_path() {
    let _lock = env_lock();
    let _g1 = EnvGuard::set("LEGATO_CONFIG_PATH", "/tmp/legato-test-config.toml");
    assert_eq!(
        resolve_config_path().unwrap(),
        std::path::PathBuf::from("/tmp/legato-test-config.toml")
    );
}

#[test]
fn default_config_path_prefers_xdg_config_home() {
    let _lock = env_lock();
    let _g1 = EnvGuard::set("XDG_CONFIG_HOME", "/tmp/xdg-config-home");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-should-not-win");

    let p = default_config_path().unwrap();
    assert_eq!(
        p,
        std::path::PathBuf::from("/tmp/xdg-config-home")
            .join("legato")
            .join("config.toml")
    );
}

#[test]
fn default_config_path_falls_back_to_home_dot_config() {
    let _lock = env_lock();
    let _g1 = EnvGuard::remove("XDG_CONFIG_HOME");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-dir");

    let p = default_config_path().unwrap();
    assert_eq!(
        p,
        std::path::PathBuf::from("/tmp/home-dir")
            .join(".config")
            .join("legato")
            .join("config.toml")
    );
}

#[test]
fn state_dir_falls_back_to_home_local_state() {
    let _lock = env_lock();
    let _g1 = EnvGuard::remove("XDG_STATE_HOME");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-dir");

    assert_eq!(
        state_dir().unwrap(),
        std::path::PathBuf::from("/tmp/home-dir/.local/state/legato")
    );
}

#[test]
fn defaults_are_valid_and_cover_all_supported_extensions() {
    let s = Settings::default();
    assert!(s.validate().is_ok());
    assert_eq!(s.library.extensions.len(), 8);
    assert_eq!(s.equalizer.gains.len(), 10);
    assert_eq!(s.playback.repeat, RepeatModeSetting::Off);
    assert_eq!(s.playback.prev_restart_ms, 3000);
}

#[test]
fn validate_rejects_out_of_range_values() {
    let mut s = Settings::default();
    s.audio.volume = 1.5;
    assert!(s.validate().is_err());

    let mut s = Settings::default();
    s.audio.speed = 0.0;
    assert!(s.validate().is_err());

    let mut s = Settings::default();
    s.equalizer.gains = vec![0.0; 11];
    assert!(s.validate().is_err());

    let mut s = Settings::default();
    s.equalizer.preset = Some("not-a-preset".into());
    assert!(s.validate().is_err());
}

#[test]
fn settings_load_from_config_file_and_parse_repeat_aliases() {
    let _lock = env_lock();

    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.toml");
    std::fs::write(
        &cfg_path,
        r#"
[playback]
shuffle = true
repeat = "repeat-one"
prev_restart_ms = 5000
error_skip_delay_ms = 250
shuffle_seed = 99

[audio]
volume = 0.5
crossfade_ms = 0
fade_in = false
quit_fade_out_ms = 123
device = "USB DAC"

[equalizer]
enabled = false
gains = [3.0, 2.0, 1.0]
bass_boost_db = 4.5
preset = "rock"

[controls]
scrub_seconds = 9

[library]
extensions = ["mp3"]
recursive = false
include_hidden = false
follow_links = false

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let _g1 = EnvGuard::set("LEGATO_CONFIG_PATH", cfg_path.to_str().unwrap());
    let _g2 = EnvGuard::remove("LEGATO__AUDIO__CROSSFADE_MS");

    let s = Settings::load().unwrap();
    assert!(s.playback.shuffle);
    assert_eq!(s.playback.repeat, RepeatModeSetting::One);
    assert_eq!(s.playback.prev_restart_ms, 5000);
    assert_eq!(s.playback.error_skip_delay_ms, 250);
    assert_eq!(s.playback.shuffle_seed, Some(99));
    assert_eq!(s.audio.volume, 0.5);
    assert_eq!(s.audio.crossfade_ms, 0);
    assert!(!s.audio.fade_in);
    assert!(s.audio.fade_out);
    assert_eq!(s.audio.quit_fade_out_ms, 123);
    assert_eq!(s.audio.device.as_deref(), Some("USB DAC"));
    assert!(!s.equalizer.enabled);
    assert_eq!(s.equalizer.gains, vec![3.0, 2.0, 1.0]);
    assert_eq!(s.equalizer.bass_boost_db, 4.5);
    assert_eq!(s.equalizer.preset.as_deref(), Some("rock"));
    assert_eq!(s.controls.scrub_seconds, 9);
    assert_eq!(s.library.extensions, vec!["mp3".to_string()]);
    assert!(!s.library.recursive);
    assert!(!s.library.include_hidden);
    assert!(!s.library.follow_links);
    assert_eq!(s.logging.level, "debug");
    assert!(s.validate().is_ok());
}

#[test]
fn settings_env_overrides_config_file() {
    let _lock = env_lock();

    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.toml");
    std::fs::write(
        &cfg_path,
        r#"
[audio]
crossfade_ms = 250
"#,
    )
    .unwrap();

    let _g1 = EnvGuard::set("LEGATO_CONFIG_PATH", cfg_path.to_str().unwrap());
    let _g2 = EnvGuard::set("LEGATO__AUDIO__CROSSFADE_MS", "0");

    let s = Settings::load().unwrap();
    assert_eq!(s.audio.crossfade_ms, 0);
}
