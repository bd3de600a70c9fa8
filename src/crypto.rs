// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;

/// Install the process-wide rustls provider used by HTTPS sinks, unless one is
/// already installed.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    match rustls::crypto::aws_lc_rs::default_provider().install_default() {
        Ok(()) => Ok(()),
        // Lost a race with another installer.
        Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
        Err(e) => Err(format!("failed to initialize crypto library: {:?}", e).into()),
    }
}
