/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use hyper::http::StatusCode;
use hyper::{Method, Uri};
use hyper_rustls::HttpsConnector;
use hyper_timeout::TimeoutConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::SmError;

const REST_TIME_OUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub enum RestScheme {
    Http,
    Https,
}

impl From<String> for RestScheme {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "HTTPS" => RestScheme::Https,
            _ => RestScheme::Http,
        }
    }
}

impl Display for RestScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RestScheme::Http => write!(f, "http"),
            RestScheme::Https => write!(f, "https"),
        }
    }
}

pub struct RestClientConfig {
    pub address: String,
    pub port: Option<u16>,
    pub scheme: RestScheme,
    /// Either `base64(user:pass)` or a UFM access token; sent as
    /// `Authorization: Basic <auth_info>` both ways.
    pub auth_info: String,
    pub base_path: String,
}

pub struct RestClient {
    base_url: String,
    auth_info: String,
    scheme: RestScheme,
    http_client: HyperClient<TimeoutConnector<HttpConnector>, String>,
    https_client: HyperClient<TimeoutConnector<HttpsConnector<HttpConnector>>, String>,
}

impl RestClient {
    pub fn new(conf: &RestClientConfig) -> Result<RestClient, SmError> {
        let auth_info = format!("Basic {}", conf.auth_info.trim());

        let base_url = match &conf.port {
            None => format!(
                "{}://{}/{}",
                conf.scheme,
                conf.address,
                conf.base_path.trim_matches('/')
            ),
            Some(p) => format!(
                "{}://{}:{}/{}",
                conf.scheme,
                conf.address,
                p,
                conf.base_path.trim_matches('/')
            ),
        };

        let _ = base_url
            .parse::<Uri>()
            .map_err(|_| SmError::InvalidConfig("invalid rest address".to_string()))?;

        let mut http_connector = TimeoutConnector::new(HttpConnector::new());
        http_connector.set_connect_timeout(Some(REST_TIME_OUT));
        http_connector.set_read_timeout(Some(REST_TIME_OUT));
        http_connector.set_write_timeout(Some(REST_TIME_OUT));

        // UFM appliances ship self-signed certificates; certificate checking
        // is disabled for the HTTPS path.
        let tls_config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        // unwrap safety: the error only comes if the configured protocol versions are
        // invalid, which should never happen with the safe defaults.
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureServerVerifier::new()))
        .with_no_client_auth();

        let mut https_connector = TimeoutConnector::new(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls_config)
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .build(),
        );
        https_connector.set_connect_timeout(Some(REST_TIME_OUT));
        https_connector.set_read_timeout(Some(REST_TIME_OUT));
        https_connector.set_write_timeout(Some(REST_TIME_OUT));

        Ok(Self {
            base_url,
            auth_info,
            scheme: conf.scheme.clone(),
            http_client: HyperClient::builder(TokioExecutor::new()).build(http_connector),
            https_client: HyperClient::builder(TokioExecutor::new()).build(https_connector),
        })
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SmError> {
        let resp = self.execute_request(Method::GET, path, None).await?;
        // UFM uses {} with a 200 status code to indicate "Not Found"
        if resp.body == "{}" {
            return Err(SmError::NotFound {
                path: path.to_string(),
                body: resp.body,
            });
        }

        match serde_json::from_str(&resp.body) {
            Ok(data) => Ok(data),
            Err(_) => Err(SmError::MalformedResponse {
                status_code: resp.status_code,
                body: resp.body,
            }),
        }
    }

    pub async fn post(&self, path: &str, data: String) -> Result<(), SmError> {
        self.execute_request(Method::POST, path, Some(data)).await?;

        Ok(())
    }

    async fn execute_request(
        &self,
        method: Method,
        path: &str,
        data: Option<String>,
    ) -> Result<Response, SmError> {
        let url = format!("{}/{}", self.base_url, path.trim_matches('/'));
        let uri = url
            .parse::<Uri>()
            .map_err(|_| SmError::InvalidConfig("invalid path".to_string()))?;

        let body = data.unwrap_or_default();

        let req = hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_AGENT, env!("CARGO_PKG_NAME"))
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, self.auth_info.to_string())
            .body(body)
            .map_err(|_| SmError::InvalidConfig("invalid rest request".to_string()))?;

        let response = match &self.scheme {
            RestScheme::Http => self.http_client.request(req).await,
            RestScheme::Https => self.https_client.request(req).await,
        }
        .map_err(|e| SmError::HttpConnectionError(format!("Rest request failure: {e:?}")))?;

        let status = response.status();
        let body = String::from_utf8_lossy(
            &response
                .into_body()
                .collect()
                .await
                .map_err(|e| SmError::HttpConnectionError(e.to_string()))?
                .to_bytes(),
        )
        .into_owned();

        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(Response {
                status_code: status.as_u16(),
                body,
            }),
            StatusCode::NOT_FOUND => Err(SmError::NotFound {
                path: path.to_string(),
                body,
            }),
            status => Err(SmError::HttpError {
                status_code: status.as_u16(),
                body,
            }),
        }
    }
}

struct Response {
    status_code: u16,
    body: String,
}

/// Accepts any server certificate while keeping signature checks intact.
#[derive(Debug)]
struct InsecureServerVerifier {
    provider: rustls::crypto::CryptoProvider,
}

impl InsecureServerVerifier {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
