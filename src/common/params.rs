//! Generic parameter file loading

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::Path;
use thiserror::Error;

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot load the parameter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

/// Load a parameter file from the given path.
pub fn load<P, T>(path: T) -> Result<P, LoadError>
where
    P: DeserializeOwned,
    T: AsRef<Path>,
{
    let params_str = read_to_string(path).map_err(LoadError::FileLoadError)?;
    from_str(&params_str)
}

/// Parse parameters from a TOML string.
pub fn from_str<P>(params_str: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    toml::from_str(params_str).map_err(LoadError::DeserialiseError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Dummy {
        steps: usize,
    }

    #[test]
    fn test_missing_file() {
        let res: Result<Dummy, _> = load("does/not/exist.toml");
        assert!(matches!(res, Err(LoadError::FileLoadError(_))));
    }

    #[test]
    fn test_parse() {
        let d: Dummy = from_str("steps = 12").unwrap();
        assert_eq!(d.steps, 12);

        let bad: Result<Dummy, _> = from_str("steps = \"twelve\"");
        assert!(matches!(bad, Err(LoadError::DeserialiseError(_))));
    }
}
