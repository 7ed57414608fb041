use std::fmt;
use std::io::Error;

/// Environment variable name containing the environment identifier.
const ENV_VAR_NAME: &str = "ENV";

/// Production environment identifier.
const PROD_ENV_NAME: &str = "prod";

/// Development environment identifier.
const DEV_ENV_NAME: &str = "dev";

/// Test environment identifier.
const TEST_ENV_NAME: &str = "test";

/// Runtime environment for the control plane.
///
/// Used to toggle permissive CORS and relaxed startup checks in tests, and
/// to pick the log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
    /// Test environment. Relaxes required-variable checks and enables
    /// wide-open CORS on the outer gateway.
    Test,
}

impl Environment {
    /// Loads the environment from the `ENV` environment variable.
    ///
    /// Defaults to [`Environment::Prod`] if the variable is not set.
    pub fn load() -> Result<Environment, Error> {
        std::env::var(ENV_VAR_NAME)
            .unwrap_or_else(|_| PROD_ENV_NAME.into())
            .try_into()
    }

    /// Sets the `ENV` environment variable to this environment's value.
    pub fn set(&self) {
        unsafe { std::env::set_var(ENV_VAR_NAME, self.to_string()) }
    }

    /// Returns whether this is the production environment.
    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }

    /// Returns whether this is the test environment.
    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Environment::Prod => write!(f, "{PROD_ENV_NAME}"),
            Environment::Dev => write!(f, "{DEV_ENV_NAME}"),
            Environment::Test => write!(f, "{TEST_ENV_NAME}"),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    /// Creates an [`Environment`] from a string, case-insensitively.
    ///
    /// Accepts "prod", "dev", or "test". Returns an error for unsupported
    /// values.
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            PROD_ENV_NAME => Ok(Self::Prod),
            DEV_ENV_NAME => Ok(Self::Dev),
            TEST_ENV_NAME => Ok(Self::Test),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use either `{PROD_ENV_NAME}`/`{DEV_ENV_NAME}`/`{TEST_ENV_NAME}`.",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments_case_insensitively() {
        assert_eq!(Environment::try_from("PROD".to_string()).unwrap(), Environment::Prod);
        assert_eq!(Environment::try_from("dev".to_string()).unwrap(), Environment::Dev);
        assert_eq!(Environment::try_from("Test".to_string()).unwrap(), Environment::Test);
    }

    #[test]
    fn rejects_unknown_environment() {
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
