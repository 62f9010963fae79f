//! The subcommands, kept apart from argument parsing so they can be driven
//! directly.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tracing::info;

use tether::auth::Certificate;
use tether::auth::Fingerprint;
use tether::auth::Keystore;
use tether::auth::Password;
use tether::Communicator;
use tether::CommunicatorConfig;
use tether::EndpointConfig;

use crate::demo;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Starts a communicator for `endpoint` and serves until Ctrl-C.
pub async fn serve(endpoint: &str) -> Result<()> {
    let endpoint: EndpointConfig = endpoint.parse().context("parsing endpoint configuration")?;
    let identity = endpoint.load_identity().context("opening keystore")?;

    let node = Communicator::builder(CommunicatorConfig::from_endpoint(&endpoint))
        .identity(identity)
        .start()
        .await?;
    demo::install(&node)?;

    // the only line on stdout; scripts wait for it
    println!("Server is now ready at {}", node.local_address());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}

/// Creates a keystore at `out`. Returns the password when it was not written
/// to `password_out`.
pub fn enroll(name: &str, days: u64, out: &Path, password_out: Option<&Path>) -> Result<Option<Password>> {
    anyhow::ensure!(days > 0, "validity must be at least one day");
    let validity = DAY
        .checked_mul(u32::try_from(days).context("validity too long")?)
        .context("validity too long")?;

    let (keystore, password) = Keystore::enroll(name, validity)?;
    let mut saving = Password::from_bytes(password.as_bytes().to_vec());
    keystore.save(out, &mut saving).with_context(|| format!("writing {}", out.display()))?;
    info!(name, fingerprint = %keystore.export_certificate().fingerprint(), path = %out.display(), "enrolled");

    match password_out {
        Some(path) => {
            password.write_to(path)?;
            Ok(None)
        }
        None => Ok(Some(password)),
    }
}

/// Writes `password` and a newline straight to `out`, without formatting it
/// into an intermediate buffer.
pub fn print_password(out: &mut impl Write, password: &Password) -> std::io::Result<()> {
    out.write_all(password.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Writes the keystore's own certificate to `out`.
pub fn export_cert(keystore: &Path, password_file: &Path, out: &Path) -> Result<Fingerprint> {
    let mut password = Password::read_from(password_file)?;
    let keystore = Keystore::load(keystore, &mut password).context("opening keystore")?;
    let certificate = keystore.export_certificate();
    std::fs::write(out, certificate.to_bytes()?).with_context(|| format!("writing {}", out.display()))?;
    Ok(certificate.fingerprint())
}

/// Adds the certificate at `certificate` to the keystore's trusted set and
/// saves it back in place.
pub fn trust(keystore_path: &Path, password_file: &Path, certificate: &Path) -> Result<Fingerprint> {
    let bytes = std::fs::read(certificate).with_context(|| format!("reading {}", certificate.display()))?;
    let certificate = Certificate::from_bytes(&bytes).context("decoding certificate")?;
    anyhow::ensure!(certificate.verify_signature(), "certificate signature does not verify");

    // loading scrubs the password, and saving needs it again
    let password = Password::read_from(password_file)?;
    let mut loading = Password::from_bytes(password.as_bytes().to_vec());
    let mut saving = password;

    let mut keystore = Keystore::load(keystore_path, &mut loading).context("opening keystore")?;
    let fingerprint = certificate.fingerprint();
    keystore.trust(certificate);
    keystore
        .save(keystore_path, &mut saving)
        .with_context(|| format!("writing {}", keystore_path.display()))?;
    info!(%fingerprint, "certificate trusted");
    Ok(fingerprint)
}
