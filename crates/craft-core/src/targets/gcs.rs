//! GCS target (§4.5): uploads downloaded artifacts to a Cloud Storage bucket
//! under one or more rendered path templates.
//!
//! Per-template fan-out is concurrent (bounded download concurrency already
//! caps how many files are in flight at once via the shared artifact
//! provider); templates themselves are walked sequentially so a broken
//! template localizes its failure instead of aborting sibling templates
//! mid-upload.

use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use craft_auth::GcsCredentials;
use craft_types::{CraftError, RemoteArtifact};
use flate2::write::GzEncoder;
use flate2::Compression;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::target::{PublishCtx, Target};
use crate::targets::common::default_filter;
use crate::template::render_gcs_path;

const GCS_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Refresh a minute before Google's own 3600s expiry to leave headroom for
/// an in-flight upload that straddles the boundary.
const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// The subset of a GCP service-account JSON key this target needs to mint
/// its own OAuth access tokens via the JWT-bearer grant (RFC 7523), without
/// depending on a full Google Cloud SDK.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsUploadMetadata {
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

impl Default for GcsUploadMetadata {
    fn default() -> Self {
        Self { cache_control: default_cache_control() }
    }
}

fn default_cache_control() -> String {
    "public, max-age=3600".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsConfig {
    pub bucket: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub gzip: bool,
    #[serde(default)]
    pub metadata: GcsUploadMetadata,
}

pub trait GcsClient: Send + Sync {
    fn upload(&self, bucket: &str, object_path: &str, body: &[u8], gzip: bool, cache_control: &str) -> Result<(), CraftError>;
}

pub struct HttpGcsClient {
    client: reqwest::blocking::Client,
    key: ServiceAccountKey,
    token: Mutex<Option<(String, SystemTime)>>,
}

impl HttpGcsClient {
    pub fn new(credentials: GcsCredentials) -> Result<Self, CraftError> {
        let raw = match &credentials {
            GcsCredentials::Json(json) => json.clone(),
            GcsCredentials::Path(path) => {
                std::fs::read_to_string(path).map_err(|e| CraftError::configuration("gcs", format!("reading credentials file {}: {e}", path.display())))?
            }
        };
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| CraftError::configuration("gcs", format!("parsing service-account JSON: {e}")))?;
        Ok(Self {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
            key,
            token: Mutex::new(None),
        })
    }

    /// Exchange the service-account private key for a bearer access token
    /// via the JWT-bearer grant (RFC 7523), caching it until shortly before
    /// Google's one-hour expiry.
    fn access_token(&self) -> Result<String, CraftError> {
        {
            let cached = self.token.lock().expect("gcs token cache mutex poisoned");
            if let Some((token, expires_at)) = cached.as_ref() {
                if *expires_at > SystemTime::now() {
                    return Ok(token.clone());
                }
            }
        }

        let now = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|e| CraftError::transient(e.to_string()))?;
        let iat = now.as_secs();
        let exp = iat + 3600;
        let claims = JwtClaims { iss: &self.key.client_email, scope: GCS_SCOPE, aud: &self.key.token_uri, iat, exp };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| CraftError::configuration("gcs", format!("invalid service-account private key: {e}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| CraftError::transient(format!("signing GCS access-token JWT: {e}")))?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"), ("assertion", assertion.as_str())])
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("GCS token exchange failed: {}", response.status())));
        }
        let parsed: TokenResponse = response.json().map_err(|e| CraftError::transient(e.to_string()))?;

        let mut cached = self.token.lock().expect("gcs token cache mutex poisoned");
        *cached = Some((parsed.access_token.clone(), SystemTime::now() + Duration::from_secs(3600) - TOKEN_REFRESH_SKEW));
        Ok(parsed.access_token)
    }
}

impl GcsClient for HttpGcsClient {
    fn upload(&self, bucket: &str, object_path: &str, body: &[u8], gzip: bool, cache_control: &str) -> Result<(), CraftError> {
        let token = self.access_token()?;
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{bucket}/o?uploadType=media&name={}",
            urlencode(object_path.trim_start_matches('/'))
        );
        let payload = if gzip { gzip_compress(body)? } else { body.to_vec() };
        let mut request = self.client.post(&url).bearer_auth(token).header("Cache-Control", cache_control).body(payload);
        if gzip {
            request = request.header("Content-Encoding", "gzip");
        }
        let response = request.send().map_err(|e| CraftError::transient(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CraftError::transient(format!("gcs upload of {object_path} failed: {}", response.status())))
        }
    }
}

fn gzip_compress(body: &[u8]) -> Result<Vec<u8>, CraftError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(|e| CraftError::transient(e.to_string()))?;
    encoder.finish().map_err(|e| CraftError::transient(e.to_string()))
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

pub struct GcsTarget<C: GcsClient> {
    pub config: GcsConfig,
    pub client: C,
}

impl<C: GcsClient> GcsTarget<C> {
    pub fn new(config: GcsConfig, client: C) -> Self {
        Self { config, client }
    }
}

impl<C: GcsClient> Target for GcsTarget<C> {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        let vars = json!({"version": ctx.version.to_string(), "revision": ctx.revision.as_str()});

        for template in &self.config.paths {
            let base_path = render_gcs_path(template, &vars)?;
            for artifact in &artifacts {
                upload_one(self, ctx, &base_path, artifact)?;
            }
        }
        Ok(())
    }
}

fn upload_one<C: GcsClient>(target: &GcsTarget<C>, ctx: &mut PublishCtx<'_>, base_path: &str, artifact: &RemoteArtifact) -> Result<(), CraftError> {
    let object_path = format!("{}/{}", base_path.trim_end_matches('/'), artifact.filename);
    if ctx.dry_run {
        ctx.reporter.info(&format!("[dry-run] would upload {} to gs://{}{}", artifact.filename, target.config.bucket, object_path));
        return Ok(());
    }
    let local_path = ctx.artifacts.download_artifact(artifact, None)?;
    let body = std::fs::read(&local_path).map_err(|e| CraftError::transient(e.to_string()))?;
    target.client.upload(&target.config.bucket, &object_path, &body, target.config.gzip, &target.config.metadata.cache_control)?;
    ctx.reporter.info(&format!("uploaded {} to gs://{}{}", artifact.filename, target.config.bucket, object_path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_provider::ArtifactProvider;
    use crate::reporter::NullReporter;
    use craft_types::{ArtifactNameFilter, ChecksumSpec, Revision};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    struct FakeGcs {
        uploaded: Mutex<Vec<String>>,
    }

    impl GcsClient for FakeGcs {
        fn upload(&self, _bucket: &str, object_path: &str, _body: &[u8], _gzip: bool, _cache_control: &str) -> Result<(), CraftError> {
            self.uploaded.lock().unwrap().push(object_path.to_string());
            Ok(())
        }
    }

    struct FakeProvider;
    impl ArtifactProvider for FakeProvider {
        fn filter_artifacts_for_revision(&self, _revision: &Revision, _filter: &ArtifactNameFilter) -> Result<Vec<RemoteArtifact>, CraftError> {
            Ok(vec![RemoteArtifact { id: 1, filename: "pkg.tar.gz".to_string(), mime_type: "application/gzip".to_string(), stored_file: None }])
        }
        fn download_artifact(&self, _artifact: &RemoteArtifact, _dst_dir: Option<&Path>) -> Result<PathBuf, CraftError> {
            Ok(PathBuf::from("/tmp/pkg.tar.gz"))
        }
        fn get_checksum(&self, _artifact: &RemoteArtifact, _spec: ChecksumSpec) -> Result<String, CraftError> {
            unreachable!()
        }
    }

    #[test]
    fn renders_template_and_uploads_each_artifact() {
        std::fs::write("/tmp/pkg.tar.gz", b"data").unwrap();
        let gcs = FakeGcs { uploaded: Mutex::new(Vec::new()) };
        let config = GcsConfig { bucket: "my-bucket".to_string(), paths: vec!["dist/{{version}}".to_string()], gzip: false, metadata: GcsUploadMetadata::default() };
        let target = GcsTarget::new(config, gcs);

        let mut reporter = NullReporter;
        let revision = Revision::parse("a".repeat(40)).unwrap();
        let version = craft_types::Version::parse("1.0.0").unwrap();
        let mut ctx = PublishCtx {
            version: &version,
            revision: &revision,
            github_owner: "acme",
            github_repo: "demo",
            dry_run: false,
            artifacts: Arc::new(FakeProvider),
            reporter: &mut reporter,
        };
        target.publish(&mut ctx).unwrap();
        let uploaded = target.client.uploaded.lock().unwrap();
        assert_eq!(uploaded.as_slice(), ["/dist/1.0.0/pkg.tar.gz"]);
    }
}
