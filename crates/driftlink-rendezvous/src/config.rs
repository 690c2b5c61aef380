//! Binary configuration surface, grounded in `umbra-relay::main::Args`'s
//! `clap::Parser` + `env = "..."` pattern.

use clap::Parser;

/// Runtime configuration for the `driftlink-rendezvous` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "driftlink-rendezvous", version, about = "DriftLink PIN rendezvous and signaling relay")]
pub struct RendezvousConfig {
    /// Port to listen on.
    #[arg(long, default_value_t = 8787, env = "DRIFTLINK_PORT")]
    pub port: u16,

    /// Session time-to-live, in seconds.
    #[arg(long, default_value_t = crate::store::SESSION_TTL_SECS, env = "DRIFTLINK_SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// How often the in-memory store sweeps expired sessions, in seconds.
    #[arg(long, default_value_t = 60, env = "DRIFTLINK_CLEANUP_INTERVAL_SECS")]
    pub cleanup_interval_secs: u64,

    /// Redis host, used only when built with the `redis-store` feature.
    #[cfg(feature = "redis-store")]
    #[arg(long, default_value = "127.0.0.1", env = "DRIFTLINK_REDIS_HOST")]
    pub redis_host: String,

    /// Redis port, used only when built with the `redis-store` feature.
    #[cfg(feature = "redis-store")]
    #[arg(long, default_value_t = 6379, env = "DRIFTLINK_REDIS_PORT")]
    pub redis_port: u16,

    /// Redis password, used only when built with the `redis-store` feature.
    #[cfg(feature = "redis-store")]
    #[arg(long, env = "DRIFTLINK_REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    /// Management API base URL the signaling handler can post connection
    /// events back to. Optional; unused by anything in this crate today,
    /// carried per spec.md §6's "registry reads ... the management-API
    /// endpoint for posting back to connections" environment input.
    #[arg(long, env = "DRIFTLINK_MANAGEMENT_API_URL")]
    pub management_api_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_args() {
        let config = RendezvousConfig::parse_from(["driftlink-rendezvous"]);
        assert_eq!(config.port, 8787);
        assert_eq!(config.session_ttl_secs, crate::store::SESSION_TTL_SECS);
        assert_eq!(config.cleanup_interval_secs, 60);
    }
}
