//! instant-acme backed [`CertificateAuthority`].

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair, PKCS_ECDSA_P256_SHA256};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{
    AccountStore, CertificateAuthority, ChallengeResponder, ChallengeStore, IssueRequest,
    IssuedCertificate,
};
use crate::certs::CertError;

/// Upper bound for validation plus certificate download
const ORDER_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_POLL_DELAY: Duration = Duration::from_secs(5);

pub struct AcmeAuthority {
    accounts: AccountStore,
    challenges: ChallengeStore,
    challenge_address: String,
    /// Replaces the provider's directory, for private or test CAs
    directory_override: Option<String>,
    /// One order at a time; the responder address can only be bound once
    issue_lock: Mutex<()>,
}

impl AcmeAuthority {
    pub fn new(accounts: AccountStore, challenge_address: impl Into<String>) -> Self {
        Self {
            accounts,
            challenges: ChallengeStore::new(),
            challenge_address: challenge_address.into(),
            directory_override: None,
            issue_lock: Mutex::new(()),
        }
    }

    pub fn with_directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_override = Some(url.into());
        self
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    fn directory_url<'a>(&'a self, request: &IssueRequest) -> &'a str {
        self.directory_override
            .as_deref()
            .unwrap_or_else(|| request.provider.directory_url(request.staging))
    }

    /// Cached account for the provider and email, registering one when absent
    async fn account(&self, request: &IssueRequest) -> Result<Account, CertError> {
        let domain = request.domain.as_str();

        if let Some(credentials) = self.accounts.load(request.provider, &request.email) {
            match Account::from_credentials(credentials).await {
                Ok(account) => return Ok(account),
                Err(e) => {
                    warn!(
                        provider = %request.provider,
                        email = %request.email,
                        error = %e,
                        "Cached ACME account unusable, registering a new one"
                    );
                }
            }
        }

        let contact = format!("mailto:{}", request.email);
        let directory = self.directory_url(request);
        info!(provider = %request.provider, directory, email = %request.email, "Registering ACME account");

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory,
            None,
        )
        .await
        .map_err(|e| CertError::acme(domain, format!("account registration failed: {e}")))?;

        self.accounts
            .save(request.provider, &request.email, &credentials)?;
        Ok(account)
    }

    /// Publish HTTP-01 answers and tell the CA they are ready
    async fn answer_challenges(
        &self,
        order: &mut Order,
        domain: &str,
        guard: &mut TokenGuard<'_>,
    ) -> Result<(), CertError> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| CertError::acme(domain, e))?;

        let mut ready = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                status => {
                    return Err(CertError::acme(
                        domain,
                        format!("authorization is {status:?}"),
                    ))
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| CertError::acme(domain, "CA offered no HTTP-01 challenge"))?;

            let key_authorization = order.key_authorization(challenge);
            self.challenges
                .add(&challenge.token, key_authorization.as_str());
            guard.tokens.push(challenge.token.clone());
            ready.push(challenge.url.clone());
        }

        for url in &ready {
            order
                .set_challenge_ready(url)
                .await
                .map_err(|e| CertError::acme(domain, e))?;
        }
        debug!(domain, challenges = ready.len(), "HTTP-01 challenges ready");
        Ok(())
    }
}

impl std::fmt::Debug for AcmeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeAuthority")
            .field("accounts", &self.accounts.dir())
            .field("challenge_address", &self.challenge_address)
            .field("directory_override", &self.directory_override)
            .finish()
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, CertError> {
        let _serial = self.issue_lock.lock().await;
        let domain = request.domain.as_str();
        let started = Instant::now();
        let deadline = started + ORDER_TIMEOUT;

        let account = self.account(request).await?;

        let _responder = ChallengeResponder::bind(&self.challenge_address, self.challenges.clone())
            .await
            .map_err(|e| {
                CertError::acme(
                    domain,
                    format!(
                        "cannot bind challenge responder on {}: {e}",
                        self.challenge_address
                    ),
                )
            })?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| CertError::acme(domain, e))?;

        let mut guard = TokenGuard {
            store: &self.challenges,
            tokens: Vec::new(),
        };
        self.answer_challenges(&mut order, domain, &mut guard).await?;

        let mut delay = Duration::from_millis(250);
        loop {
            sleep(delay).await;
            let state = order.refresh().await.map_err(|e| CertError::acme(domain, e))?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(CertError::acme(
                        domain,
                        "order is invalid; the CA could not fetch the challenge over HTTP",
                    ))
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(CertError::acme(domain, "timed out waiting for validation"));
            }
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
        drop(guard);

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let mut params = CertificateParams::new(vec![domain.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;

        if order.state().status == OrderStatus::Ready {
            order
                .finalize(csr.der())
                .await
                .map_err(|e| CertError::acme(domain, e))?;
        }

        let cert_chain_pem = loop {
            match order
                .certificate()
                .await
                .map_err(|e| CertError::acme(domain, e))?
            {
                Some(chain) => break chain,
                None if Instant::now() >= deadline => {
                    return Err(CertError::acme(domain, "timed out waiting for the certificate"))
                }
                None => sleep(Duration::from_secs(1)).await,
            }
        };

        info!(
            domain,
            provider = %request.provider,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Certificate issued"
        );
        Ok(IssuedCertificate {
            cert_chain_pem,
            key_pem: key_pair.serialize_pem(),
        })
    }
}

/// Withdraws published tokens however the order ends
struct TokenGuard<'a> {
    store: &'a ChallengeStore,
    tokens: Vec<String>,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        for token in &self.tokens {
            self.store.remove(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::AcmeProvider;

    fn request(provider: AcmeProvider, staging: bool) -> IssueRequest {
        IssueRequest {
            domain: "shop.test".into(),
            email: "ops@example.com".into(),
            provider,
            staging,
        }
    }

    #[test]
    fn test_directory_selection() {
        let authority = AcmeAuthority::new(AccountStore::new("/tmp/accounts"), "127.0.0.1:0");
        assert_eq!(
            authority.directory_url(&request(AcmeProvider::LetsEncrypt, true)),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );

        let pebble = AcmeAuthority::new(AccountStore::new("/tmp/accounts"), "127.0.0.1:0")
            .with_directory_url("https://localhost:14000/dir");
        assert_eq!(
            pebble.directory_url(&request(AcmeProvider::ZeroSsl, false)),
            "https://localhost:14000/dir"
        );
    }

    #[test]
    fn test_token_guard_withdraws_tokens() {
        let store = ChallengeStore::new();
        store.add("t1", "k1");
        {
            let _guard = TokenGuard {
                store: &store,
                tokens: vec!["t1".to_string()],
            };
        }
        assert_eq!(store.pending(), 0);
    }
}
