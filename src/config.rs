use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    /// Base URL of the remote conversion backend.
    pub backend_url: String,
    /// Directory holding the legacy converter script and its virtualenv.
    pub converter_dir: PathBuf,
    /// Optional shell command that starts the backend when the health
    /// probe finds it down. No autostart is attempted when unset.
    pub backend_start_cmd: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let backend_url = env::var("BACKEND_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let converter_dir = env::var("CONVERTER_DIR").unwrap_or_else(|_| ".".to_string());
        let converter_dir = PathBuf::from(converter_dir);

        let backend_start_cmd = env::var("BACKEND_START_CMD").ok().filter(|s| !s.is_empty());

        // Load server configuration with defaults
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::Config(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::Config(format!("Invalid host address: {}", e)))?;

        let server_addr = SocketAddr::new(ip, port);

        Ok(Config {
            server_addr,
            backend_url,
            converter_dir,
            backend_start_cmd,
        })
    }
}
