//! A blocking OCI distribution client.
//!
//! Only anonymous pulls are supported: a `401` carrying a bearer challenge is
//! answered with a token fetched without credentials, and the token is reused
//! for later requests to the same repository.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use ureq::http::Response;
use ureq::Body;

use cacheprobe_util::Cancellation;

use crate::digest::Digest;
use crate::error::ImageError;
use crate::manifest::{host_platform, Compression, Descriptor, Manifest, ACCEPTED_MANIFESTS};
use crate::reference::ImageReference;
use crate::source::{Image, ImageSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry client over `ureq`.
pub struct RegistryClient {
    agent: ureq::Agent,
    /// Bearer tokens keyed by `host/repository`.
    tokens: Mutex<BTreeMap<String, String>>,
}

impl RegistryClient {
    /// Create a client. `insecure` disables TLS certificate verification.
    pub fn new(insecure: bool) -> Self {
        let mut config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT));
        if insecure {
            config = config.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }
        Self {
            agent: ureq::Agent::new_with_config(config.build()),
            tokens: Mutex::default(),
        }
    }

    /// Fetch the manifest for `reference`, resolving an index to the host
    /// platform. Returns the image manifest and its digest.
    fn resolve_manifest(
        &self,
        reference: &ImageReference,
        cancel: &Cancellation,
    ) -> Result<(Manifest, Digest), ImageError> {
        let (manifest, digest, is_index) = self.fetch_manifest(reference, cancel)?;
        if !is_index {
            return Ok((manifest, digest));
        }

        let (os, arch) = host_platform();
        let entry = manifest
            .platform_entry(os, arch)
            .ok_or_else(|| ImageError::NoMatchingPlatform {
                reference: reference.to_string(),
                platform: format!("{os}/{arch}"),
            })?;
        let child = reference.with_digest(Digest::parse(&entry.digest)?);
        tracing::debug!(reference = %reference, platform = %format!("{os}/{arch}"), child = %child, "resolved index");

        let (manifest, digest, nested) = self.fetch_manifest(&child, cancel)?;
        if nested {
            return Err(ImageError::UnsupportedMediaType {
                media_type: "nested image index".to_owned(),
            });
        }
        Ok((manifest, digest))
    }

    fn fetch_manifest(
        &self,
        reference: &ImageReference,
        cancel: &Cancellation,
    ) -> Result<(Manifest, Digest, bool), ImageError> {
        let url = format!("{}/manifests/{}", reference.api_base(), reference.manifest_ref());
        let accept = ACCEPTED_MANIFESTS.join(", ");
        let response = self.send(reference, &url, Some(&accept), cancel)?;
        let response = ensure_success(reference, response)?;

        let header_digest = header(&response, "docker-content-digest");
        let content_type = header(&response, "content-type")
            .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_owned());
        let body = read_body(reference, response, cancel)?;

        let digest = match header_digest {
            Some(d) => Digest::parse(&d)?,
            None => Digest::of_bytes(&body),
        };
        let manifest = Manifest::from_json(&body, &reference.to_string())?;
        let is_index = manifest.is_index(content_type.as_deref());
        tracing::debug!(reference = %reference, digest = %digest, is_index, "fetched manifest");
        Ok((manifest, digest, is_index))
    }

    fn open_blob(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
        cancel: &Cancellation,
    ) -> Result<Box<dyn Read + 'static>, ImageError> {
        let compression = Compression::of_layer(&descriptor.media_type)?;
        let url = format!("{}/blobs/{}", reference.api_base(), descriptor.digest);
        let response = self.send(reference, &url, None, cancel)?;
        let response = ensure_success(reference, response)?;

        let reader = CancellableReader {
            inner: response.into_body().into_reader(),
            cancel: cancel.clone(),
        };
        Ok(match compression {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        })
    }

    /// GET `url`, answering one bearer challenge if the registry asks.
    fn send(
        &self,
        reference: &ImageReference,
        url: &str,
        accept: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<Response<Body>, ImageError> {
        let scope_key = format!("{}/{}", reference.api_host(), reference.repository);
        let token = self
            .tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&scope_key).cloned());

        let response = self.get(reference, url, accept, token.as_deref(), cancel)?;
        if response.status().as_u16() != 401 {
            return Ok(response);
        }
        let Some(challenge) =
            header(&response, "www-authenticate").and_then(|h| Challenge::parse(&h))
        else {
            return Ok(response);
        };

        let token = self.fetch_token(reference, &challenge, cancel)?;
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(scope_key, token.clone());
        }
        self.get(reference, url, accept, Some(&token), cancel)
    }

    fn get(
        &self,
        reference: &ImageReference,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<Response<Body>, ImageError> {
        cancel.check()?;
        let mut request = self.agent.get(url);
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(remaining) = cancel.remaining() {
            request = request.config().timeout_global(Some(remaining)).build();
        }
        request
            .call()
            .map_err(|e| transport_error(reference, &e, cancel))
    }

    fn fetch_token(
        &self,
        reference: &ImageReference,
        challenge: &Challenge,
        cancel: &Cancellation,
    ) -> Result<String, ImageError> {
        cancel.check()?;
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository));
        let mut request = self.agent.get(&challenge.realm).query("scope", &scope);
        if let Some(service) = &challenge.service {
            request = request.query("service", service);
        }
        if let Some(remaining) = cancel.remaining() {
            request = request.config().timeout_global(Some(remaining)).build();
        }

        let response = request
            .call()
            .map_err(|e| as_auth_error(transport_error(reference, &e, cancel)))?;
        let response = ensure_success(reference, response).map_err(as_auth_error)?;
        let body = read_body(reference, response, cancel).map_err(as_auth_error)?;
        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| ImageError::Auth {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(reference = %reference, realm = %challenge.realm, "obtained anonymous token");
        parsed
            .token
            .or(parsed.access_token)
            .ok_or_else(|| ImageError::Auth {
                reference: reference.to_string(),
                message: "token response carries no token".to_owned(),
            })
    }
}

impl ImageSource for RegistryClient {
    fn fetch_digest(&self, reference: &str, cancel: &Cancellation) -> Result<Digest, ImageError> {
        let parsed = ImageReference::parse(reference)?;
        let (_, digest) = self.resolve_manifest(&parsed, cancel)?;
        Ok(digest)
    }

    fn fetch_image<'a>(
        &'a self,
        reference: &str,
        cancel: &Cancellation,
    ) -> Result<Box<dyn Image + 'a>, ImageError> {
        let parsed = ImageReference::parse(reference)?;
        let (manifest, digest) = self.resolve_manifest(&parsed, cancel)?;
        Ok(Box::new(RemoteImage {
            client: self,
            reference: parsed,
            digest,
            layers: manifest.layers,
            cancel: cancel.clone(),
        }))
    }
}

struct RemoteImage<'a> {
    client: &'a RegistryClient,
    reference: ImageReference,
    digest: Digest,
    layers: Vec<Descriptor>,
    cancel: Cancellation,
}

impl Image for RemoteImage<'_> {
    fn digest(&self) -> &Digest {
        &self.digest
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn open_layer(&self, index: usize) -> Result<Box<dyn Read + '_>, ImageError> {
        let descriptor = self.layers.get(index).ok_or(ImageError::LayerIndex {
            index,
            count: self.layers.len(),
        })?;
        tracing::debug!(reference = %self.reference, layer = %descriptor.digest, size = descriptor.size, "opening layer");
        self.client
            .open_blob(&self.reference, descriptor, &self.cancel)
    }
}

/// Fails reads once the pass is cancelled, so a long blob download stops
/// between chunks.
struct CancellableReader<R> {
    inner: R,
    cancel: Cancellation,
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cancel.check().map_err(std::io::Error::other)?;
        self.inner.read(buf)
    }
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Challenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl Challenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = BTreeMap::new();
        let mut remaining = rest.trim();
        while !remaining.is_empty() {
            let (key, after) = remaining.split_once('=')?;
            let after = after.trim_start();
            let (value, tail) = match after.strip_prefix('"') {
                Some(quoted) => {
                    let end = quoted.find('"')?;
                    (quoted.get(..end)?, quoted.get(end + 1..)?)
                }
                None => match after.find(',') {
                    Some(comma) => (after.get(..comma)?, after.get(comma..)?),
                    None => (after, ""),
                },
            };
            params.insert(key.trim().to_ascii_lowercase(), value.to_owned());
            remaining = tail.trim_start().trim_start_matches(',').trim_start();
        }

        Some(Self {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
}

fn header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn ensure_success(
    reference: &ImageReference,
    response: Response<Body>,
) -> Result<Response<Body>, ImageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.into_body();
    let bytes = body.read_to_vec().unwrap_or_default();
    let (code, message) = describe_error_body(&bytes);
    Err(ImageError::Registry {
        reference: reference.to_string(),
        status: status.as_u16(),
        code,
        message: message
            .or_else(|| status.canonical_reason().map(str::to_owned))
            .unwrap_or_default(),
    })
}

/// The first distribution error code and message in an error body.
fn describe_error_body(body: &[u8]) -> (Option<String>, Option<String>) {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    match parsed.errors.into_iter().next() {
        Some(entry) => {
            let message = if entry.message.is_empty() {
                entry.code.to_lowercase().replace('_', " ")
            } else {
                entry.message
            };
            (Some(entry.code), Some(message))
        }
        None => (None, None),
    }
}

fn read_body(
    reference: &ImageReference,
    response: Response<Body>,
    cancel: &Cancellation,
) -> Result<Vec<u8>, ImageError> {
    let mut body = response.into_body();
    body.read_to_vec()
        .map_err(|e| transport_error(reference, &e, cancel))
}

/// A failed request is reported as the cancellation if the pass has stopped,
/// since an expired deadline surfaces from ureq as a timeout.
fn transport_error(reference: &ImageReference, err: &ureq::Error, cancel: &Cancellation) -> ImageError {
    match cancel.check() {
        Err(stop) => ImageError::Util(stop),
        Ok(()) => ImageError::Transport {
            reference: reference.to_string(),
            message: err.to_string(),
        },
    }
}

/// Token endpoint failures say nothing about the image itself, so they never
/// read as a missing manifest. Cancellation passes through unchanged.
fn as_auth_error(err: ImageError) -> ImageError {
    match err {
        ImageError::Registry {
            reference,
            status,
            message,
            ..
        } => ImageError::Auth {
            reference,
            message: format!("token endpoint returned {status}: {message}"),
        },
        ImageError::Transport { reference, message } => ImageError::Auth { reference, message },
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cacheprobe_util::UtilError;

    use super::*;

    #[test]
    fn token_endpoint_not_found_is_an_auth_failure() {
        let err = as_auth_error(ImageError::Registry {
            reference: "reg.local/cache:latest".to_owned(),
            status: 404,
            code: Some("NAME_UNKNOWN".to_owned()),
            message: "not found".to_owned(),
        });
        assert!(matches!(err, ImageError::Auth { .. }));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn token_endpoint_transport_failure_is_an_auth_failure() {
        let err = as_auth_error(ImageError::Transport {
            reference: "reg.local/cache:latest".to_owned(),
            message: "connection refused".to_owned(),
        });
        assert!(matches!(err, ImageError::Auth { .. }));
    }

    #[test]
    fn token_endpoint_cancellation_is_kept() {
        let err = as_auth_error(ImageError::Util(UtilError::Cancelled));
        assert!(err.is_cancellation());
    }

    #[test]
    fn challenge_with_all_parameters() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:library/alpine:pull"));
    }

    #[test]
    fn challenge_scope_may_contain_commas() {
        let challenge =
            Challenge::parse(r#"bearer realm="https://ghcr.io/token", scope="repository:a/b:pull,push""#)
                .unwrap();
        assert_eq!(challenge.scope.as_deref(), Some("repository:a/b:pull,push"));
        assert!(challenge.service.is_none());
    }

    #[test]
    fn challenge_without_realm_or_non_bearer_is_ignored() {
        assert!(Challenge::parse(r#"Bearer service="x""#).is_none());
        assert!(Challenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(Challenge::parse("Bearer").is_none());
    }

    #[test]
    fn error_body_yields_first_code() {
        let body = br#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown","detail":{}}]}"#;
        let (code, message) = describe_error_body(body);
        assert_eq!(code.as_deref(), Some("MANIFEST_UNKNOWN"));
        assert_eq!(message.as_deref(), Some("manifest unknown"));
    }

    #[test]
    fn error_body_without_message_uses_code() {
        let (code, message) = describe_error_body(br#"{"errors":[{"code":"NAME_UNKNOWN"}]}"#);
        assert_eq!(code.as_deref(), Some("NAME_UNKNOWN"));
        assert_eq!(message.as_deref(), Some("name unknown"));
    }

    #[test]
    fn unparseable_error_body_is_empty() {
        assert_eq!(describe_error_body(b"<html>502</html>"), (None, None));
    }

    #[test]
    fn cancelled_reader_stops() {
        let cancel = Cancellation::new();
        let mut reader = CancellableReader {
            inner: &b"layer bytes"[..],
            cancel: cancel.clone(),
        };
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        cancel.cancel();
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn cancelled_pass_makes_no_request() {
        let client = RegistryClient::new(false);
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = client
            .fetch_digest("registry.invalid/cache:latest", &cancel)
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
