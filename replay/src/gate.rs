use sessionwire_config::SessionwireConfig;

/// Deployment environment in which replay is never served.
pub const PRODUCTION_ENV: &str = "production";

/// Whether this process may serve recorded runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayGate {
    Enabled,
    Disabled(DisabledReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// `replay.enabled` is off.
    NotEnabled,
    /// Running in production, whatever the flag says.
    Production,
}

impl ReplayGate {
    pub fn evaluate(enabled: bool, deploy_env: &str) -> Self {
        if deploy_env.trim().eq_ignore_ascii_case(PRODUCTION_ENV) {
            ReplayGate::Disabled(DisabledReason::Production)
        } else if enabled {
            ReplayGate::Enabled
        } else {
            ReplayGate::Disabled(DisabledReason::NotEnabled)
        }
    }

    pub fn from_config(config: &SessionwireConfig) -> Self {
        Self::evaluate(config.replay.enabled, &config.deploy_env)
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, ReplayGate::Enabled)
    }
}
