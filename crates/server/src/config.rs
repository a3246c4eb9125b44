use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use visual::{DEFAULT_PORT, DEFAULT_TICK_RATE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_viewers: usize,
    pub viewer_timeout_secs: u64,
    /// Ticks between tab-list refreshes.
    pub tab_refresh_ticks: u64,
    /// `{online}` and `{max}` are substituted.
    pub tab_header: String,
    /// `{ping}` and `{name}` are substituted.
    pub tab_footer: String,
    /// Name tag for viewers without a rank of their own.
    pub name_tag: NameTagConfig,
    /// Per-player name tags keyed by the name sent in `Hello`.
    #[serde(default)]
    pub ranks: HashMap<String, NameTagConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameTagConfig {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub color_rgb: u32,
    pub priority: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            max_viewers: 32,
            viewer_timeout_secs: 30,
            tab_refresh_ticks: 20,
            tab_header: "{online}/{max} players".into(),
            tab_footer: "{name} - ping {ping}ms".into(),
            name_tag: NameTagConfig::default(),
            ranks: HashMap::new(),
        }
    }
}

impl Default for NameTagConfig {
    fn default() -> Self {
        Self {
            prefix: Some("[visual] ".into()),
            suffix: None,
            color_rgb: 0x55_ff_55,
            priority: 0,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn viewer_timeout(&self) -> Duration {
        Duration::from_secs(self.viewer_timeout_secs)
    }
}
