//! Client for the mix chain.
//!
//! Two calls are made per round: every member signs the round settings,
//! then the head of the chain mixes the batch and returns one reply per
//! onion. [`HttpMixChain`] speaks the JSON-over-HTTP protocol below; tests
//! substitute their own [`MixChain`].
//!
//!   POST {member}/v1/newround   {"service", "round"}            -> {"signature"}
//!   POST {head}/v1/runround     {"service", "round", "onions"}  -> {"replies"}

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cascade_core::chain::MixServer;
use cascade_core::crypto::{self, SignatureError};
use cascade_core::round::{Round, RoundSettings, Signature, SignatureSet};
use cascade_core::wire::hex_bytes_vec;

#[derive(Debug, thiserror::Error)]
pub enum MixnetError {
    #[error("mix chain is empty")]
    EmptyChain,
    #[error("request to {server} failed: {reason}")]
    Transport { server: String, reason: String },
    #[error("{server} answered with status {status}")]
    Status { server: String, status: u16 },
    #[error("{server} did not answer in time")]
    Timeout { server: String },
    #[error("{server} has an invalid public key")]
    BadKey { server: String },
    #[error("bad signature from {server}: {source}")]
    BadSignature {
        server: String,
        #[source]
        source: SignatureError,
    },
    #[error("expected {expected} signatures, got {got}")]
    SignatureCount { expected: usize, got: usize },
    #[error("expected {expected} replies, got {got}")]
    ReplyCount { expected: usize, got: usize },
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// The mix chain as seen by the coordinator.
#[async_trait]
pub trait MixChain: Send + Sync {
    /// Ask every member to sign `settings`. Signatures come back in the
    /// order of `members`.
    async fn negotiate_round(
        &self,
        members: &[MixServer],
        settings: &RoundSettings,
    ) -> Result<SignatureSet, MixnetError>;

    /// Submit a batch to the chain head. `replies[i]` answers `onions[i]`.
    async fn run_batch(
        &self,
        head: &MixServer,
        service: &str,
        round: Round,
        onions: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, MixnetError>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct NewRoundRequest<'a> {
    service: &'a str,
    round: Round,
}

#[derive(Deserialize)]
struct NewRoundResponse {
    signature: Signature,
}

#[derive(Serialize)]
struct RunRoundRequest<'a> {
    service: &'a str,
    round: Round,
    #[serde(with = "hex_bytes_vec")]
    onions: Vec<Bytes>,
}

#[derive(Deserialize)]
struct RunRoundResponse {
    #[serde(with = "hex_bytes_vec")]
    replies: Vec<Bytes>,
}

pub struct HttpMixChain {
    client: reqwest::Client,
    negotiate_timeout: Option<Duration>,
}

impl HttpMixChain {
    /// `negotiate_timeout` bounds each `newround` request; `None` waits
    /// indefinitely. Batch runs take as long as the chain needs.
    pub fn new(negotiate_timeout: Option<Duration>) -> Result<Self, MixnetError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MixnetError::Transport {
                server: "<client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            negotiate_timeout,
        })
    }

    async fn post<Req, Resp>(
        &self,
        server: &MixServer,
        path: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp, MixnetError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", server.address.trim_end_matches('/'), path);
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                MixnetError::Timeout {
                    server: server.address.clone(),
                }
            } else {
                MixnetError::Transport {
                    server: server.address.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let mut request = self.client.post(&url).json(body);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        let resp = request.send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MixnetError::Status {
                server: server.address.clone(),
                status: status.as_u16(),
            });
        }
        resp.json::<Resp>().await.map_err(classify)
    }

    async fn sign_one(
        &self,
        member: &MixServer,
        settings: &RoundSettings,
    ) -> Result<Signature, MixnetError> {
        let key = member.key_bytes().ok_or_else(|| MixnetError::BadKey {
            server: member.address.clone(),
        })?;
        let req = NewRoundRequest {
            service: &settings.service,
            round: settings.round,
        };
        let resp: NewRoundResponse = self
            .post(member, "/v1/newround", &req, self.negotiate_timeout)
            .await?;
        crypto::verify_settings(&key, settings, &resp.signature.0).map_err(|source| {
            MixnetError::BadSignature {
                server: member.address.clone(),
                source,
            }
        })?;
        Ok(resp.signature)
    }
}

#[async_trait]
impl MixChain for HttpMixChain {
    async fn negotiate_round(
        &self,
        members: &[MixServer],
        settings: &RoundSettings,
    ) -> Result<SignatureSet, MixnetError> {
        if members.is_empty() {
            return Err(MixnetError::EmptyChain);
        }
        let calls = members.iter().map(|m| self.sign_one(m, settings));
        // try_join_all keeps input order, so signatures line up with members.
        let signatures = futures::future::try_join_all(calls).await?;
        Ok(SignatureSet(signatures))
    }

    async fn run_batch(
        &self,
        head: &MixServer,
        service: &str,
        round: Round,
        onions: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, MixnetError> {
        let expected = onions.len();
        let req = RunRoundRequest {
            service,
            round,
            onions,
        };
        let resp: RunRoundResponse = self.post(head, "/v1/runround", &req, None).await?;
        if resp.replies.len() != expected {
            return Err(MixnetError::ReplyCount {
                expected,
                got: resp.replies.len(),
            });
        }
        Ok(resp.replies)
    }
}
