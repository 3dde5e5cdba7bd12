//! API key generation, hashing and issuance.
//!
//! Keys look like `csa_` followed by 32 ASCII alphanumerics. The plaintext is shown once, at
//! issuance; storage keeps the lowercase hex SHA-256 of the full key and its first 8 characters
//! for display.

use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::db::TelemetryStore;
use crate::db::errors::DbError;
use crate::db::models::{
    api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
    projects::{ProjectCreateDBRequest, ProjectDBResponse},
};
use crate::errors::{Error, Result};

pub const KEY_PREFIX: &str = "csa_";
const KEY_RANDOM_LEN: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub fn generate_api_key() -> String {
    let mut rng = rng();
    let random: String = (0..KEY_RANDOM_LEN)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("{KEY_PREFIX}{random}")
}

pub fn hash_api_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

pub fn display_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// A freshly issued key. `plaintext` is not recoverable afterwards.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub project: ProjectDBResponse,
    pub key: ApiKeyDBResponse,
    pub plaintext: String,
}

/// Issue a key for the project with `slug`, creating the project first if needed.
#[instrument(skip(store), err)]
pub async fn issue_api_key(store: &dyn TelemetryStore, slug: &str, project_name: Option<&str>, label: &str) -> Result<IssuedApiKey> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(Error::invalid("project_slug", "must not be empty"));
    }

    let project = match store.get_project_by_slug(slug).await? {
        Some(project) => project,
        None => {
            let request = ProjectCreateDBRequest {
                name: project_name.unwrap_or(slug).to_string(),
                slug: slug.to_string(),
            };
            match store.create_project(&request).await {
                Ok(project) => {
                    info!(project = %project.slug, "Created project");
                    project
                }
                // Lost a race with a concurrent issuer
                Err(DbError::UniqueViolation { .. }) => store.get_project_by_slug(slug).await?.ok_or(DbError::NotFound)?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    let plaintext = generate_api_key();
    let key = store
        .create_api_key(&ApiKeyCreateDBRequest {
            project_id: project.id,
            label: label.to_string(),
            key_hash: hash_api_key(&plaintext),
            key_prefix: display_prefix(&plaintext),
        })
        .await?;
    info!(project = %project.slug, prefix = %key.key_prefix, "Issued API key");

    Ok(IssuedApiKey { project, key, plaintext })
}
