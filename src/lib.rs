pub mod ceremony;
pub mod config;
pub mod softtoken;
pub mod store;
pub mod webauthn;

pub use ceremony::{CeremonyEngine, CeremonyError};
pub use store::{CredentialStore, MemoryCredentialStore};

use std::sync::Arc;

/// Exercise the full ceremony core once against a software authenticator:
/// register a credential, log in with it, then confirm a replayed response
/// is rejected. Exits non-zero if any step misbehaves.
pub async fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    tracing::info!("Starting credorium self-check");

    let rp = cfg.rp();
    let credentials: Arc<dyn store::CredentialStore> = match &cfg.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let key = load_or_create_store_key(&dir.join("store.key"))?;
            Arc::new(store::DiskCredentialStore::load(key, dir.clone())?)
        }
        None => Arc::new(store::MemoryCredentialStore::new()),
    };
    let sessions: Arc<dyn ceremony::SessionStore> = Arc::new(ceremony::MemorySessionStore::new());
    tokio::spawn(ceremony::sweep_task(sessions.clone(), rp.session_ttl));

    let engine = CeremonyEngine::new(rp.clone(), credentials, sessions);
    let origin = rp
        .allowed_origins
        .first()
        .ok_or_else(|| anyhow::anyhow!("at least one --origin is required"))?;
    let mut token = softtoken::SoftToken::new(rp.rp_id.clone(), origin.clone());

    // Registration round trip.
    let (options, session) = engine.begin_registration("selfcheck", "Self Check")?;
    let response = token.register(&options);
    let credential = engine.finish_registration("selfcheck", &session, &response)?;
    println!(
        "registered credential {} for 'selfcheck'",
        hex(&credential.credential_id)
    );

    // Login round trip.
    let (options, session) = engine.begin_login("selfcheck")?;
    let response = token
        .assert(&options)
        .ok_or_else(|| anyhow::anyhow!("software token holds no allowed credential"))?;
    let credential = engine.finish_login("selfcheck", &session, &response)?;
    println!("login verified, signature counter now {}", credential.sign_count);

    // A consumed session must not be replayable.
    match engine.finish_login("selfcheck", &session, &response) {
        Err(CeremonyError::SessionNotFound) => println!("replayed response rejected"),
        Ok(_) => anyhow::bail!("replayed login response was accepted"),
        Err(e) => anyhow::bail!("replay failed with unexpected error: {e}"),
    }

    Ok(())
}

fn load_or_create_store_key(path: &std::path::Path) -> anyhow::Result<[u8; 32]> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("store.key is not 32 bytes"))?;
        Ok(key)
    } else {
        let key: [u8; 32] = rand::Rng::r#gen(&mut rand::thread_rng());
        write_key_file(path, &key)?;
        Ok(key)
    }
}

/// The master key file must be readable by the owner only.
fn write_key_file(path: &std::path::Path, key: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?.write_all(key)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
