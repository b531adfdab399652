use clap::Parser;
use std::path::PathBuf;

/// deployment overrides; each flag can also come from the environment
#[derive(Debug, Default, Parser)]
#[command(name = "climate-hub", version, about)]
pub struct Args {
    /// path to hub.toml (otherwise config/hub.toml or ../config/hub.toml)
    #[arg(long, env = "HUB_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// e.g. mqtts://broker.example.net:8883
    #[arg(long, env = "MQTT_BROKER_URI")]
    pub broker_uri: Option<String>,

    #[arg(long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "MQTT_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// device id stamped on readings without a `uuid`
    #[arg(long, env = "DEVICE_DEFAULT_ID")]
    pub device_id: Option<String>,

    /// firmware version stamped on readings without a `version`
    #[arg(long, env = "DEVICE_DEFAULT_FIRMWARE")]
    pub firmware_version: Option<String>,
}
