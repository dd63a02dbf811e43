use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use log::debug;

/// Method parameters (the stego key): string keyed, parsed on demand.
#[derive(Clone, Debug, Default)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Parse a `name=value,name=value,...` stego key.
    pub fn parse_key(key: &str) -> Result<Self> {
        let mut map = HashMap::new();
        if key.is_empty() {
            return Ok(Params { map });
        }
        for pair in key.split(',') {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed key entry {pair:?}, expected name=value"))?;
            if name.is_empty() {
                bail!("malformed key entry {pair:?}, empty parameter name");
            }
            map.insert(name.to_string(), value.to_string());
        }
        Ok(Params { map })
    }

    pub fn insert<V: Display>(&mut self, name: &str, value: V) {
        self.map.insert(name.to_string(), value.to_string());
    }

    /// Typed value of `name`, or `default` when absent.
    pub fn get_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.map.get(name) {
            None => Ok(default),
            Some(raw) => Self::parse(name, raw),
        }
    }

    /// Typed value of `name`; fails when absent.
    pub fn get<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self
            .map
            .get(name)
            .ok_or_else(|| anyhow!("missing parameter: {name}"))?;
        Self::parse(name, raw)
    }

    /// Unparsed value of `name`, if present.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// Log every entry at debug level.
    pub fn dump(&self) {
        for (name, value) in &self.map {
            debug!("param {name:?} = {value:?}");
        }
    }

    fn parse<T>(name: &str, raw: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        raw.parse()
            .map_err(|e| anyhow!("invalid value {raw:?} for parameter {name}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let params = Params::parse_key("framesize=2048,amp=0.5").unwrap();
        assert_eq!(params.get_or("framesize", 1024usize).unwrap(), 2048);
        assert!((params.get_or("amp", 0.4f64).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_key_is_empty_bag() {
        let params = Params::parse_key("").unwrap();
        assert_eq!(params.get_or("lsbs", 1u32).unwrap(), 1);
    }

    #[test]
    fn missing_parameter_fails_get() {
        let params = Params::parse_key("").unwrap();
        let err = params.get::<u32>("samplerate").unwrap_err();
        assert!(err.to_string().contains("missing parameter"));
    }

    #[test]
    fn malformed_values_fail() {
        assert!(Params::parse_key("framesize").is_err());
        assert!(Params::parse_key("=1024").is_err());

        let params = Params::parse_key("framesize=abc").unwrap();
        assert!(params.get_or("framesize", 1024usize).is_err());
    }

    #[test]
    fn injected_values_win() {
        let mut params = Params::parse_key("samplerate=1").unwrap();
        params.insert("samplerate", 44100u32);
        assert_eq!(params.get::<u32>("samplerate").unwrap(), 44100);
    }
}
