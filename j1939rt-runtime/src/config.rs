use serde::Deserialize;

/// Load and deserialize a TOML configuration file.
pub fn from_toml<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> std::io::Result<T> {
    use std::io::Read;

    let mut contents = String::new();
    std::fs::File::open(path)?.read_to_string(&mut contents)?;

    toml::from_str(&contents).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

/// Global configuration shared by every module, mirroring the "bin
/// name / daemon flag" subset the CLI binds regardless of which modules
/// are registered.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub bin_name: String,
    pub daemon: bool,
}

/// The `can.interface` / `j1939.enabled` / `simulator.*` surface the core
/// recognizes. Any other TOML key is opaque and preserved verbatim.
pub trait Configurable: Clone {
    fn global(&self) -> &GlobalConfig;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct J1939Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for J1939Config {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub engine: bool,
    #[serde(default)]
    pub transmission: bool,
    #[serde(default)]
    pub brakes: bool,
}

/// The core-recognized configuration surface. `extra` preserves any other
/// keys (dashboard, MQTT bridge, …) without interpreting them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub j1939: J1939Config,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(flatten)]
    pub extra: toml::value::Table,
    #[serde(skip)]
    pub global: GlobalConfig,
}

impl Configurable for Config {
    fn global(&self) -> &GlobalConfig {
        &self.global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_keys_survive_into_extra() {
        let parsed: Config = toml::from_str(
            r#"
            [can]
            interface = "vcan3"

            [j1939]
            enabled = false

            [simulator]
            engine = true

            [dashboard]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(parsed.can.interface, "vcan3");
        assert!(!parsed.j1939.enabled);
        assert!(parsed.simulator.engine);
        assert!(!parsed.simulator.brakes);
        assert!(parsed.extra.contains_key("dashboard"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.can.interface, "vcan0");
        assert!(parsed.j1939.enabled);
    }
}
