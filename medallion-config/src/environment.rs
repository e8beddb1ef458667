use std::fmt;
use std::io;

/// Environment variable used to select the runtime environment.
const APP_ENVIRONMENT: &str = "APP_ENVIRONMENT";

/// Runtime environment the pipeline is configured for.
///
/// Selects which environment-specific configuration file is layered on top of
/// the base configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    /// Loads the environment from the `APP_ENVIRONMENT` variable.
    ///
    /// Defaults to [`Environment::Dev`] when the variable is unset.
    pub fn load() -> io::Result<Self> {
        match std::env::var(APP_ENVIRONMENT) {
            Ok(value) => value.parse().map_err(|unknown| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown environment `{unknown}`"),
                )
            }),
            Err(_) => Ok(Environment::Dev),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        };

        f.write_str(name)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Prod
        );
        assert!("galaxy".parse::<Environment>().is_err());
    }
}
