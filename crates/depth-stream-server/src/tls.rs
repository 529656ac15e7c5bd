//! TLS setup for the persistent session transport: either a self-signed
//! certificate or one loaded from PEM files.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rcgen::{CertificateParams, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::{rustls, TlsAcceptor};

pub fn generate_self_signed(bind_ip: IpAddr) -> Result<TlsAcceptor> {
    tracing::info!("generating self-signed TLS certificate");

    let key_pair = KeyPair::generate().context("failed to generate key pair")?;

    let mut san_names = vec!["localhost".to_string()];
    let ip_str = bind_ip.to_string();
    if !bind_ip.is_unspecified() && ip_str != "localhost" {
        san_names.push(ip_str);
    }

    let mut params = CertificateParams::new(san_names).context("failed to build certificate params")?;
    if !bind_ip.is_unspecified() {
        params.subject_alt_names.push(SanType::IpAddress(bind_ip));
    }
    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        rcgen::DnValue::Utf8String("depth-stream-server".to_string()),
    );

    let cert = params
        .self_signed(&key_pair)
        .context("failed to self-sign certificate")?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    make_acceptor(vec![cert_der], key_der)
}

pub fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    tracing::info!(?cert_path, ?key_path, "loading TLS certificate from files");

    let cert_bytes = std::fs::read(cert_path).context("failed to read certificate file")?;
    let key_bytes = std::fs::read(key_path).context("failed to read private key file")?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<_, _>>()
        .context("failed to parse certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .context("failed to parse private key PEM")?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    make_acceptor(certs, key)
}

fn make_acceptor(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<TlsAcceptor> {
    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("bad certificate/key pair")?;

    #[cfg(debug_assertions)]
    {
        server_config.key_log = Arc::new(rustls::KeyLogFile::new());
    }

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
