use std::time::Duration;

pub const CHALLENGE_LEN: usize = 32;
pub const SESSION_TOKEN_LEN: usize = 16;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;
pub const DEFAULT_CEREMONY_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AttestationPolicy {
    Direct,
    Indirect,
    None,
    /// Accept statements the relying party cannot verify (fmt "none",
    /// unknown formats, certificate chains without a trust store).
    NoneAcceptable,
}

impl AttestationPolicy {
    /// Conveyance preference advertised in creation options.
    pub fn conveyance(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::None | Self::NoneAcceptable => "none",
        }
    }
}

impl std::fmt::Display for AttestationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::None => "none",
            Self::NoneAcceptable => "none-acceptable",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UserVerificationPolicy {
    Required,
    Preferred,
    Discouraged,
}

impl UserVerificationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

impl std::fmt::Display for UserVerificationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relying-party settings consumed by the ceremony engine and verifiers.
#[derive(Debug, Clone)]
pub struct RpConfig {
    pub rp_id: String,
    pub rp_name: String,
    pub allowed_origins: Vec<String>,
    pub session_ttl: Duration,
    pub attestation: AttestationPolicy,
    pub user_verification: UserVerificationPolicy,
}

impl RpConfig {
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>) -> Self {
        let rp_id = rp_id.into();
        Self {
            rp_name: rp_id.clone(),
            rp_id,
            allowed_origins: vec![origin.into()],
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            attestation: AttestationPolicy::NoneAcceptable,
            user_verification: UserVerificationPolicy::Preferred,
        }
    }

    pub fn require_user_verification(&self) -> bool {
        self.user_verification == UserVerificationPolicy::Required
    }
}

#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Relying-party id (the effective domain).
    #[arg(long, default_value = "localhost")]
    pub rp_id: String,
    /// Human-readable relying-party name.
    #[arg(long, default_value = "credorium")]
    pub rp_name: String,
    /// Allowed web origin; repeat the flag for multiple origins.
    #[arg(long = "origin", default_value = "http://localhost:8000")]
    pub origins: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS)]
    pub session_ttl_secs: u64,
    #[arg(long, value_enum, default_value_t = AttestationPolicy::NoneAcceptable)]
    pub attestation: AttestationPolicy,
    #[arg(long, value_enum, default_value_t = UserVerificationPolicy::Preferred)]
    pub user_verification: UserVerificationPolicy,
    /// Persist credentials under this directory instead of in memory.
    #[arg(long)]
    pub data_dir: Option<std::path::PathBuf>,
}

impl Config {
    pub fn rp(&self) -> RpConfig {
        RpConfig {
            rp_id: self.rp_id.clone(),
            rp_name: self.rp_name.clone(),
            allowed_origins: self.origins.clone(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            attestation: self.attestation,
            user_verification: self.user_verification,
        }
    }
}
