use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_SERVER_PORT: u16 = 12345;
pub const DEFAULT_WINNING_NUMBER: u32 = 7574;
pub const DEFAULT_DRAW_TIMEOUT_SECS: u64 = 300;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigErr {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: String,
    // number of agencies taking part in the draw
    pub agencies: usize,
    pub bets_file: PathBuf,
    pub winning_number: u32,
    // None waits for the other agencies forever
    pub draw_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{}", DEFAULT_SERVER_PORT),
            agencies: 5,
            bets_file: "bets.csv".into(),
            winning_number: DEFAULT_WINNING_NUMBER,
            draw_timeout: Some(Duration::from_secs(DEFAULT_DRAW_TIMEOUT_SECS)),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the environment, and from a `.env` file when there is one
    pub fn from_env() -> Result<Self, ConfigErr> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigErr> {
        let defaults = Self::default();

        let agencies = parse_var(&lookup, "NUM_AGENCIES")?.unwrap_or(defaults.agencies);
        if agencies == 0 {
            return Err(invalid("NUM_AGENCIES", "0", "at least one agency is required"));
        }

        let draw_timeout = match parse_var::<u64>(&lookup, "DRAW_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.draw_timeout,
        };

        Ok(Self {
            address: lookup("SERVER_ADDRESS").unwrap_or(defaults.address),
            agencies,
            bets_file: lookup("BETS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.bets_file),
            winning_number: parse_var(&lookup, "LOTTERY_WINNER_NUMBER")?
                .unwrap_or(defaults.winning_number),
            draw_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyConfig {
    pub id: u32,
    pub server_address: String,
    // the most bets sent in a single batch
    pub batch_max_amount: usize,
    pub bets_file: PathBuf,
}

impl AgencyConfig {
    pub fn from_env() -> Result<Self, ConfigErr> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigErr> {
        let id: u32 = parse_var(&lookup, "CLI_ID")?.ok_or(ConfigErr::Missing("CLI_ID"))?;
        if id == 0 {
            return Err(invalid("CLI_ID", "0", "agency ids start at 1"));
        }

        let batch_max_amount = parse_var(&lookup, "BATCH_MAX_AMOUNT")?.unwrap_or(100);
        if batch_max_amount == 0 {
            return Err(invalid(
                "BATCH_MAX_AMOUNT",
                "0",
                "a batch holds at least one bet",
            ));
        }

        Ok(Self {
            id,
            server_address: lookup("SERVER_ADDRESS")
                .unwrap_or_else(|| format!("server:{}", DEFAULT_SERVER_PORT)),
            batch_max_amount,
            bets_file: lookup("BETS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| format!("agency-{}.csv", id).into()),
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigErr>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };

    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| invalid(name, &value, err))
}

fn invalid(name: &'static str, value: &str, reason: impl Display) -> ConfigErr {
    ConfigErr::Invalid {
        name,
        value: value.into(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::{AgencyConfig, ConfigErr, ServerConfig};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();

        move |name| vars.get(name).cloned()
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.address, "0.0.0.0:12345");
        assert_eq!(config.agencies, 5);
    }

    #[test]
    fn server_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_ADDRESS", "127.0.0.1:9000"),
            ("NUM_AGENCIES", " 2 "),
            ("BETS_FILE", "/tmp/bets.csv"),
            ("LOTTERY_WINNER_NUMBER", "1234"),
            ("DRAW_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.address, "127.0.0.1:9000");
        assert_eq!(config.agencies, 2);
        assert_eq!(config.bets_file.to_str(), Some("/tmp/bets.csv"));
        assert_eq!(config.winning_number, 1234);
        assert_eq!(config.draw_timeout, None);

        let config =
            ServerConfig::from_lookup(lookup(&[("DRAW_TIMEOUT_SECS", "30")])).unwrap();
        assert_eq!(config.draw_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn server_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("NUM_AGENCIES", "0")])),
            Err(ConfigErr::Invalid {
                name: "NUM_AGENCIES",
                ..
            })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("NUM_AGENCIES", "five")])),
            Err(ConfigErr::Invalid {
                name: "NUM_AGENCIES",
                ..
            })
        ));
        assert!(ServerConfig::from_lookup(lookup(&[("DRAW_TIMEOUT_SECS", "-1")])).is_err());
    }

    #[test]
    fn agency_config() {
        assert_eq!(
            AgencyConfig::from_lookup(lookup(&[])),
            Err(ConfigErr::Missing("CLI_ID"))
        );

        let config = AgencyConfig::from_lookup(lookup(&[("CLI_ID", "3")])).unwrap();
        assert_eq!(
            config,
            AgencyConfig {
                id: 3,
                server_address: "server:12345".into(),
                batch_max_amount: 100,
                bets_file: "agency-3.csv".into(),
            }
        );

        assert!(AgencyConfig::from_lookup(lookup(&[("CLI_ID", "0")])).is_err());
        assert!(
            AgencyConfig::from_lookup(lookup(&[("CLI_ID", "1"), ("BATCH_MAX_AMOUNT", "0")]))
                .is_err()
        );
    }
}
