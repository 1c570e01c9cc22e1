//! TLS certificate probe.
//!
//! Opens a TCP connection to the target's host, completes a verified TLS
//! handshake and inspects the leaf certificate the server presented.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use url::{Host, Url};
use x509_parser::prelude::*;

use super::checker::Checker;
use super::types::TlsReport;

const DEFAULT_TLS_PORT: u16 = 443;

/// Host and port a certificate is requested from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsEndpoint {
    pub host: String,
    pub ip: Option<IpAddr>,
    pub port: u16,
}

/// Resolve the endpoint for `target`, or the report explaining why it has none
pub fn parse_endpoint(target: &str) -> Result<TlsEndpoint, TlsReport> {
    let url = Url::parse(target).map_err(|_| TlsReport::failure("Invalid URL"))?;

    if url.scheme() != "https" {
        return Err(TlsReport::failure("Not an HTTPS URL"));
    }

    let (host, ip) = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => (domain.to_string(), None),
        Some(Host::Ipv4(ip)) => (ip.to_string(), Some(IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => (ip.to_string(), Some(IpAddr::V6(ip))),
        _ => return Err(TlsReport::failure("Invalid URL")),
    };

    Ok(TlsEndpoint { host, ip, port: url.port().unwrap_or(DEFAULT_TLS_PORT) })
}

/// Certificate checker with verification against the webpki root set
pub struct TlsChecker {
    connector: TlsConnector,
    timeout_duration: Duration,
}

impl TlsChecker {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout_duration: Duration::from_secs(timeout_seconds),
        })
    }

    /// Connect and handshake, returning the leaf certificate if any was sent
    async fn fetch_leaf_certificate(
        &self,
        endpoint: &TlsEndpoint,
    ) -> Result<Option<CertificateDer<'static>>, TlsReport> {
        let stream = match endpoint.ip {
            Some(ip) => TcpStream::connect((ip, endpoint.port)).await,
            None => TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await,
        }
        .map_err(|e| TlsReport::failure(format!("Connection error: {e}")))?;

        let server_name = match endpoint.ip {
            Some(ip) => ServerName::IpAddress(ip.into()),
            None => ServerName::try_from(endpoint.host.clone())
                .map_err(|_| TlsReport::failure("Invalid URL"))?,
        };

        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsReport::failure(format!("SSL error: {e}")))?;

        let (_, session) = tls_stream.get_ref();
        Ok(session.peer_certificates().and_then(|certs| certs.first()).cloned())
    }
}

#[async_trait::async_trait]
impl Checker for TlsChecker {
    type Report = TlsReport;

    async fn check(&self, target: &str) -> TlsReport {
        let endpoint = match parse_endpoint(target) {
            Ok(endpoint) => endpoint,
            Err(report) => return report,
        };

        let certificate =
            match timeout(self.timeout_duration, self.fetch_leaf_certificate(&endpoint)).await {
                Err(_) => return TlsReport::failure("Connection timeout"),
                Ok(Err(report)) => return report,
                Ok(Ok(None)) => return TlsReport::failure("No certificate found"),
                Ok(Ok(Some(certificate))) => certificate,
            };

        report_from_der(&certificate, Utc::now())
            .unwrap_or_else(|e| TlsReport::failure(format!("Certificate parse error: {e}")))
    }
}

/// Build a report from a DER encoded certificate
pub fn report_from_der(der: &[u8], now: DateTime<Utc>) -> Result<TlsReport> {
    let (_, certificate) =
        parse_x509_certificate(der).map_err(|e| anyhow!("invalid certificate: {e}"))?;

    let validity = certificate.validity();
    let valid_from = asn1_to_utc(&validity.not_before)?;
    let valid_to = asn1_to_utc(&validity.not_after)?;

    let issuer = certificate
        .issuer()
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("Unknown")
        .to_string();
    let subject = certificate
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("Unknown")
        .to_string();

    Ok(TlsReport::from_validity(issuer, subject, valid_from, valid_to, now))
}

fn asn1_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| anyhow!("certificate date out of range: {}", time))
}
