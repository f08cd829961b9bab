//! Optional TLS listener (`tls.certFile`/`tls.keyFile`, §6). Builds an
//! `axum_server` `RustlsConfig` from a PEM certificate chain and private
//! key, reusing the same `rustls` crypto provider the outbound client
//! config in `providers::http::pinned_client` already initializes.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::atoms::error::{TetoraError, TetoraResult};

pub async fn load_server_config(cert_file: &Path, key_file: &Path) -> TetoraResult<RustlsConfig> {
    RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .map_err(|e| TetoraError::Config(format!("failed to load TLS cert/key ('{}', '{}'): {}", cert_file.display(), key_file.display(), e)))
}
