use std::{env, net::{IpAddr, SocketAddr}, path::PathBuf, str::FromStr, time::Duration};
use crate::error::{config, AppErr};

pub const DEFAULT_BRIDGE: &str = "ws://127.0.0.1:21213/";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr:           SocketAddr,
    pub static_dir:     PathBuf,
    pub bridge_url:     String,
    pub like_interval:  Duration,
    pub like_burst_max: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppErr> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppErr> {
        let host: IpAddr = parse_or(&get, "HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port: u16    = parse_or(&get, "PORT", 3000)?;
        let interval_ms: u64 = parse_or(&get, "LIKE_INTERVAL_MS", 100)?;

        Ok(Self {
            addr:           SocketAddr::new(host, port),
            static_dir:     get("STATIC_DIR").map(PathBuf::from).unwrap_or_else(|| ".".into()),
            bridge_url:     get("BRIDGE_URL").unwrap_or_else(|| DEFAULT_BRIDGE.into()),
            like_interval:  Duration::from_millis(interval_ms),
            like_burst_max: parse_or(&get, "LIKE_BURST_MAX", 100)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppErr>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| config(key, e)),
        _ => Ok(default),
    }
}
