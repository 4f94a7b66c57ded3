//! OCI distribution API v2 over HTTPS.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use keeper_oci::{
    Digest, ImageReference, Manifest, Reference, RegistryError, ACCEPTED_MANIFEST_TYPES,
    DOCKER_HUB_API_HOST, DOCKER_HUB_HOST,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::auth::{Challenge, CredentialProvider, Credentials};
use super::RegistryClient;

const USER_AGENT: &str = concat!("chart-keeper/", env!("CARGO_PKG_VERSION"));
const TAG_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    Basic(Credentials),
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry client shared by every job of a run.
///
/// Authorization obtained through a `WWW-Authenticate` challenge is cached
/// per registry and scope for the client's lifetime.
pub struct HttpRegistryClient {
    http: Client,
    credentials: Box<dyn CredentialProvider>,
    auth: Mutex<HashMap<(String, String), Auth>>,
}

impl HttpRegistryClient {
    pub fn new(timeout: Duration, credentials: Box<dyn CredentialProvider>) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RegistryError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            credentials,
            auth: Mutex::new(HashMap::new()),
        })
    }

    fn base_url(registry: &str) -> String {
        let host = if registry == DOCKER_HUB_HOST {
            DOCKER_HUB_API_HOST
        } else {
            registry
        };
        let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        format!("{}://{}/v2/", scheme, host)
    }

    fn manifest_url(image: &ImageReference) -> String {
        format!(
            "{}{}/manifests/{}",
            Self::base_url(&image.registry),
            image.repository,
            image.reference.as_str()
        )
    }

    fn blob_url(image: &ImageReference, digest: &Digest) -> String {
        format!("{}{}/blobs/{}", Self::base_url(&image.registry), image.repository, digest)
    }

    fn scope(repository: &str, push: bool) -> String {
        let actions = if push { "pull,push" } else { "pull" };
        format!("repository:{}:{}", repository, actions)
    }

    fn cached_auth(&self, registry: &str, scope: &str) -> Option<Auth> {
        self.auth
            .lock()
            .ok()?
            .get(&(registry.to_string(), scope.to_string()))
            .cloned()
    }

    fn apply(builder: RequestBuilder, auth: Option<&Auth>) -> RequestBuilder {
        match auth {
            Some(Auth::Bearer(token)) => builder.bearer_auth(token),
            Some(Auth::Basic(creds)) => builder.basic_auth(&creds.username, Some(&creds.password)),
            None => builder,
        }
    }

    /// Send a request, answering one authentication challenge.
    ///
    /// 429 becomes [`RegistryError::RateLimited`] and a second 401
    /// [`RegistryError::Unauthorized`]; other statuses are left to the
    /// caller.
    fn send<F>(&self, registry: &str, scope: &str, build: F) -> Result<Response, RegistryError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let cached = self.cached_auth(registry, scope);
        let response = Self::apply(build(&self.http), cached.as_ref())
            .send()
            .map_err(transport)?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(Challenge::parse)
                .ok_or_else(|| RegistryError::Unauthorized {
                    registry: registry.to_string(),
                    message: "no usable WWW-Authenticate challenge".to_string(),
                })?;
            let auth = self.authenticate(registry, scope, challenge)?;
            if let Ok(mut cache) = self.auth.lock() {
                cache.insert((registry.to_string(), scope.to_string()), auth.clone());
            }
            let retried = Self::apply(build(&self.http), Some(&auth))
                .send()
                .map_err(transport)?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                return Err(RegistryError::Unauthorized {
                    registry: registry.to_string(),
                    message: "credentials rejected".to_string(),
                });
            }
            retried
        } else {
            response
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RegistryError::RateLimited {
                registry: registry.to_string(),
                retry_after,
            });
        }
        Ok(response)
    }

    fn authenticate(&self, registry: &str, scope: &str, challenge: Challenge) -> Result<Auth, RegistryError> {
        let credentials = self.credentials.credentials(registry);
        match challenge {
            Challenge::Basic => credentials.map(Auth::Basic).ok_or_else(|| RegistryError::Unauthorized {
                registry: registry.to_string(),
                message: "basic authentication required but no credentials configured".to_string(),
            }),
            Challenge::Bearer {
                realm,
                service,
                scope: challenged_scope,
            } => {
                let mut query = vec![("scope", challenged_scope.unwrap_or_else(|| scope.to_string()))];
                if let Some(service) = service {
                    query.push(("service", service));
                }
                let mut request = self.http.get(&realm).query(&query);
                if let Some(creds) = &credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
                let response = request.send().map_err(transport)?;
                if !response.status().is_success() {
                    return Err(RegistryError::Unauthorized {
                        registry: registry.to_string(),
                        message: format!("token endpoint returned HTTP {}", response.status().as_u16()),
                    });
                }
                let body: TokenResponse = response.json().map_err(transport)?;
                body.token
                    .or(body.access_token)
                    .map(Auth::Bearer)
                    .ok_or_else(|| RegistryError::Unauthorized {
                        registry: registry.to_string(),
                        message: "token endpoint returned no token".to_string(),
                    })
            }
        }
    }
}

impl RegistryClient for HttpRegistryClient {
    fn get_manifest(&self, image: &ImageReference) -> Result<Option<Manifest>, RegistryError> {
        let url = Self::manifest_url(image);
        let scope = Self::scope(&image.repository, false);
        let response = self.send(&image.registry, &scope, |http| {
            http.get(&url).header(ACCEPT, ACCEPTED_MANIFEST_TYPES.join(", "))
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = success(response)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = response.bytes().map_err(transport)?.to_vec();
        let manifest = Manifest::from_bytes(bytes, content_type.as_deref())?;

        if let Reference::Digest(expected) = &image.reference {
            if expected != &manifest.digest {
                return Err(RegistryError::DigestMismatch {
                    reference: image.to_string(),
                    expected: expected.to_string(),
                    actual: manifest.digest.to_string(),
                });
            }
        }
        Ok(Some(manifest))
    }

    fn manifest_exists(&self, image: &ImageReference) -> Result<bool, RegistryError> {
        let url = Self::manifest_url(image);
        let scope = Self::scope(&image.repository, false);
        let response = self.send(&image.registry, &scope, |http| {
            http.head(&url).header(ACCEPT, ACCEPTED_MANIFEST_TYPES.join(", "))
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        success(response).map(|_| true)
    }

    fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, RegistryError> {
        let base = Self::base_url(registry);
        let scope = Self::scope(repository, false);
        let mut next = Some(format!("{}{}/tags/list?n={}", base, repository, TAG_PAGE_SIZE));
        let mut tags = Vec::new();

        while let Some(url) = next.take() {
            let response = self.send(registry, &scope, |http| http.get(&url))?;
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            let response = success(response)?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link)
                .and_then(|link| Url::parse(&url).ok()?.join(&link).ok())
                .map(String::from);
            let page: TagList = response.json().map_err(transport)?;
            tags.extend(page.tags.unwrap_or_default());
        }
        tracing::debug!(registry, repository, count = tags.len(), "listed tags");
        Ok(tags)
    }

    fn blob_exists(&self, image: &ImageReference, digest: &Digest) -> Result<bool, RegistryError> {
        let url = Self::blob_url(image, digest);
        let scope = Self::scope(&image.repository, false);
        let response = self.send(&image.registry, &scope, |http| http.head(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        success(response).map(|_| true)
    }

    fn get_blob(&self, image: &ImageReference, digest: &Digest) -> Result<Bytes, RegistryError> {
        let url = Self::blob_url(image, digest);
        let scope = Self::scope(&image.repository, false);
        let response = success(self.send(&image.registry, &scope, |http| http.get(&url))?)?;
        let data = response.bytes().map_err(transport)?;
        if !digest.verifies(&data) {
            return Err(RegistryError::DigestMismatch {
                reference: url,
                expected: digest.to_string(),
                actual: Digest::sha256(&data).to_string(),
            });
        }
        Ok(data)
    }

    fn put_blob(&self, image: &ImageReference, digest: &Digest, data: Bytes) -> Result<(), RegistryError> {
        let start = format!("{}{}/blobs/uploads/", Self::base_url(&image.registry), image.repository);
        let scope = Self::scope(&image.repository, true);
        let response = success(self.send(&image.registry, &scope, |http| http.post(&start))?)?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Transport(format!("upload to {} returned no Location", start)))?;
        let mut upload = Url::parse(&start)
            .and_then(|base| base.join(location))
            .map_err(|e| RegistryError::Transport(format!("invalid upload location {}: {}", location, e)))?;
        upload.query_pairs_mut().append_pair("digest", digest.as_str());

        success(self.send(&image.registry, &scope, |http| {
            http.put(upload.as_str())
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data.clone())
        })?)?;
        Ok(())
    }

    fn put_manifest(&self, image: &ImageReference, manifest: &Manifest) -> Result<(), RegistryError> {
        let url = Self::manifest_url(image);
        let scope = Self::scope(&image.repository, true);
        success(self.send(&image.registry, &scope, |http| {
            http.put(&url)
                .header(CONTENT_TYPE, manifest.media_type.as_str())
                .body(manifest.bytes.clone())
        })?)?;
        Ok(())
    }
}

fn transport(err: reqwest::Error) -> RegistryError {
    RegistryError::Transport(err.to_string())
}

fn success(response: Response) -> Result<Response, RegistryError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RegistryError::Http {
            status: response.status().as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// Target of `rel="next"` in a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(
            HttpRegistryClient::base_url("docker.io"),
            "https://registry-1.docker.io/v2/"
        );
        assert_eq!(
            HttpRegistryClient::base_url("registry.rancher.com"),
            "https://registry.rancher.com/v2/"
        );
        assert_eq!(HttpRegistryClient::base_url("localhost:5000"), "http://localhost:5000/v2/");
    }

    #[test]
    fn test_manifest_url() {
        let image = ImageReference::tagged("docker.io", "rancher/fleet", "v0.9.0");
        assert_eq!(
            HttpRegistryClient::manifest_url(&image),
            "https://registry-1.docker.io/v2/rancher/fleet/manifests/v0.9.0"
        );
    }

    #[test]
    fn test_next_link() {
        let header = r#"</v2/rancher/fleet/tags/list?last=v1.0.0&n=1000>; rel="next""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("/v2/rancher/fleet/tags/list?last=v1.0.0&n=1000")
        );
        assert_eq!(next_link(r#"</v2/x>; rel="prev""#), None);
    }

    #[test]
    fn test_scope() {
        assert_eq!(HttpRegistryClient::scope("rancher/fleet", true), "repository:rancher/fleet:pull,push");
    }
}
