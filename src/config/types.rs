use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound on builds that talk to the engine at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Auto,
    Fixed(usize),
}

impl Concurrency {
    pub fn resolve(self) -> usize {
        match self {
            Concurrency::Fixed(n) => n,
            Concurrency::Auto => std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(1),
        }
    }
}

impl Serialize for Concurrency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Concurrency::Auto => serializer.serialize_str("auto"),
            Concurrency::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Concurrency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConcurrencyVisitor;

        impl<'de> Visitor<'de> for ConcurrencyVisitor {
            type Value = Concurrency;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"auto\" or a positive integer")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Concurrency, E> {
                if value == 0 {
                    return Err(E::custom("max_concurrent_builds must be a positive integer"));
                }
                Ok(Concurrency::Fixed(value as usize))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Concurrency, E> {
                if value <= 0 {
                    return Err(E::custom("max_concurrent_builds must be a positive integer"));
                }
                Ok(Concurrency::Fixed(value as usize))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Concurrency, E> {
                if value.eq_ignore_ascii_case("auto") {
                    Ok(Concurrency::Auto)
                } else {
                    Err(E::custom(
                        "max_concurrent_builds must be \"auto\" or a positive integer",
                    ))
                }
            }
        }

        deserializer.deserialize_any(ConcurrencyVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine CLI to invoke.
    pub docker_binary: String,
    /// Seconds allowed for each create, start and inspect call.
    pub engine_timeout: u64,
    /// Seconds allowed for a whole image pull.
    pub pull_timeout: u64,
    pub max_concurrent_builds: Concurrency,
    /// Seconds the CLI waits for a submitted build to finish.
    pub wait_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            engine_timeout: 120,
            pull_timeout: 600,
            max_concurrent_builds: Concurrency::Auto,
            wait_timeout: 900,
        }
    }
}
