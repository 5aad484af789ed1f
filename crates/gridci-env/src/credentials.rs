//! Credential providers.
//!
//! Credentials are ephemeral tokens and keys supplied by the surrounding
//! infrastructure. Absence of a credential is a normal condition (`Ok(None)`),
//! never an error: dependent jobs degrade to skipped and registry publication
//! is simply omitted.

use crate::error::EnvError;
use async_trait::async_trait;
use gridci_core::Prerequisite;
use std::collections::HashMap;

/// A resolved credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub secret: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }
}

/// Injectable source of ephemeral credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch the credential satisfying `prerequisite`, or `None` when the
    /// surrounding infrastructure does not supply one.
    async fn get(&self, prerequisite: &Prerequisite) -> Result<Option<Credential>, EnvError>;
}

/// Fixed credential set, for tests and config-driven deployments.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    credentials: HashMap<Prerequisite, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prerequisite: Prerequisite, credential: Credential) -> Self {
        self.credentials.insert(prerequisite, credential);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get(&self, prerequisite: &Prerequisite) -> Result<Option<Credential>, EnvError> {
        Ok(self.credentials.get(prerequisite).cloned())
    }
}

/// Reads credentials from conventional environment variables:
/// `GRIDCI_SSH_KEY`, `GRIDCI_REGISTRY_TOKEN`, and `GRIDCI_CREDENTIAL_<NAME>`
/// for named credentials.
#[derive(Debug, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn var_name(prerequisite: &Prerequisite) -> String {
        match prerequisite {
            Prerequisite::SshCredential => "GRIDCI_SSH_KEY".to_string(),
            Prerequisite::RegistryPushCredential => "GRIDCI_REGISTRY_TOKEN".to_string(),
            Prerequisite::Credential(name) => {
                format!("GRIDCI_CREDENTIAL_{}", name.to_uppercase().replace('-', "_"))
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn get(&self, prerequisite: &Prerequisite) -> Result<Option<Credential>, EnvError> {
        let var = Self::var_name(prerequisite);
        Ok(std::env::var(&var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|secret| Credential::new(var, secret)))
    }
}
