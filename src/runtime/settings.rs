use crate::config::Settings;

/// Load and validate the config file. An unreadable or invalid file
/// falls back to defaults; the reason comes back alongside so it can be
/// logged once logging is up (logging itself is configured from these
/// settings).
pub fn load_settings() -> (Settings, Option<String>) {
    let checked = Settings::load()
        .map_err(|e| format!("failed to load config: {e}"))
        .and_then(|s| match s.validate() {
            Ok(()) => Ok(s),
            Err(msg) => Err(format!("invalid config: {msg}")),
        });
    match checked {
        Ok(s) => (s, None),
        Err(problem) => {
            eprintln!("legato: {problem}, using defaults");
            (Settings::default(), Some(problem))
        }
    }
}
