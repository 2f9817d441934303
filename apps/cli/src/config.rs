use std::collections::HashMap;
use std::fs;

#[derive(Debug)]
pub struct Settings {
    pub base_url: String,
    pub access_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            access_token: None,
        }
    }
}

/// `chat.toml` in the working directory, overridden by environment
/// variables, overridden again by command-line flags in `main`.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("chat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("base_url") {
                settings.base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("access_token") {
                settings.access_token = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_BASE_URL") {
        settings.base_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }

    settings
}
