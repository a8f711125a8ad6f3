use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub tax_api_url: String,
    pub api_login_id: String,
    pub api_key: String,
    /// Timeout for lookup, capture and return calls.
    pub lookup_timeout: Duration,
    /// Timeout for address verification and ping.
    pub verify_timeout: Duration,
    pub taxable_address: TaxableAddress,
    pub tax_fees: bool,
    pub shipping_tic: String,
    /// JSON file of origin locations loaded at startup.
    pub origin_locations_file: Option<String>,
}

/// Which buyer address is the destination for shipped orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxableAddress {
    Shipping,
    Billing,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_TAX_API_URL: &str = "https://api.taxcloud.net/1.0/TaxCloud";
pub const DEFAULT_SHIPPING_TIC: &str = "11010";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let tax_api_url = env_map
            .get("TAX_API_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TAX_API_URL.to_string());

        // Credentials may be empty; lookups are refused until they are set.
        let api_login_id = env_map
            .get("TAX_API_LOGIN_ID")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let api_key = env_map
            .get("TAX_API_KEY")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let lookup_timeout = parse_secs(&env_map, "LOOKUP_TIMEOUT_SECS", 30)?;
        let verify_timeout = parse_secs(&env_map, "VERIFY_TIMEOUT_SECS", 15)?;

        let taxable_address = match env_map
            .get("TAXABLE_ADDRESS")
            .map(|s| s.as_str())
            .unwrap_or("shipping")
        {
            "shipping" => TaxableAddress::Shipping,
            "billing" => TaxableAddress::Billing,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TAXABLE_ADDRESS".to_string(),
                    format!("must be shipping or billing, got {}", other),
                ))
            }
        };

        let tax_fees = match env_map.get("TAX_FEES").map(|s| s.as_str()).unwrap_or("true") {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TAX_FEES".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let shipping_tic = env_map
            .get("SHIPPING_TIC")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SHIPPING_TIC.to_string());

        let origin_locations_file = env_map
            .get("ORIGIN_LOCATIONS_FILE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            database_path,
            tax_api_url,
            api_login_id,
            api_key,
            lookup_timeout,
            verify_timeout,
            taxable_address,
            tax_fees,
            shipping_tic,
            origin_locations_file,
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_login_id.is_empty() && !self.api_key.is_empty()
    }
}

fn parse_secs(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs = match env_map.get(key) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a whole number of seconds".to_string())
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}
