//! Shared serde helpers for configuration types

/// Serialize `std::time::Duration` as whole seconds
///
/// Timeouts in `config.toml` are plain integers (`connect_timeout = 15`).
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Tunnels {
///     #[serde(with = "ktm_core::config::serde_utils::duration_secs")]
///     connect_timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
