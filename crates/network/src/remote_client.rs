// crates/network/src/remote_client.rs
//! HTTP binding of the remote record service
//!
//! | call | request |
//! |---|---|
//! | connectivity | `GET {base}/health` |
//! | create | `POST {base}/entries` |
//! | update | `PUT {base}/entries/{id}` |
//! | delete | `DELETE {base}/entries/{id}` |
//! | list | `GET {base}/entries?since={checkpoint}` |
//! | lookup | `GET {base}/entries/lookup?vehicle_number=&entry_time=` |

use crate::client::{api_error_message, Client, ClientConfig};
use crate::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use lotkeeper_core::{NaturalKey, RemoteId};
use lotkeeper_sync_engine::{RemoteChangeSet, RemoteClient, RemoteError, RemotePayload};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Last observed reachability of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown,
    Online,
    Offline,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Online,
            2 => Self::Offline,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Online => 1,
            Self::Offline => 2,
        }
    }
}

/// `{ "id": ... }` body of create, lookup and conflict responses
#[derive(Debug, Deserialize)]
struct IdBody {
    #[serde(default)]
    id: Option<String>,
}

impl IdBody {
    fn remote_id(self) -> Option<RemoteId> {
        self.id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(RemoteId::new)
    }
}

/// [`RemoteClient`] over HTTP/JSON
pub struct HttpRemoteClient {
    client: Client,
    status: AtomicU8,
}

impl HttpRemoteClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            status: AtomicU8::new(ConnectionStatus::Unknown.as_u8()),
        }
    }

    pub fn with_config(config: ClientConfig) -> NetworkResult<Self> {
        Ok(Self::new(Client::with_config(config)?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.swap(status.as_u8(), Ordering::AcqRel);
        if previous != status.as_u8() {
            log::info!("Remote service is now {:?}", status);
        }
    }

    async fn ok_json<T: for<'de> Deserialize<'de>>(response: Response) -> NetworkResult<T> {
        let response = Client::expect_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| NetworkError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn check_connectivity(&self) -> bool {
        let online = match self.client.endpoint(&["health"]) {
            Ok(url) => match self.client.send(self.client.get(url)).await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    log::debug!("Health check failed: {}", e);
                    false
                }
            },
            Err(_) => false,
        };
        self.set_status(if online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        });
        online
    }

    async fn create_entry(&self, payload: &RemotePayload) -> Result<RemoteId, RemoteError> {
        let url = self.client.endpoint(&["entries"])?;
        let response = self.client.send(self.client.post(url).json(payload)).await?;

        if response.status() == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            let existing = serde_json::from_str::<IdBody>(&body)
                .ok()
                .and_then(IdBody::remote_id);
            log::debug!(
                "Create of {} rejected as duplicate: {}",
                payload.vehicle_number,
                api_error_message(StatusCode::CONFLICT, &body)
            );
            return Err(RemoteError::DuplicateKey { existing });
        }

        let body: IdBody = Self::ok_json(response).await?;
        body.remote_id().ok_or_else(|| {
            RemoteError::Transient("create response carried no id".to_string())
        })
    }

    async fn update_entry(
        &self,
        remote_id: &RemoteId,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError> {
        let url = self.client.endpoint(&["entries", remote_id.as_str()])?;
        let response = self.client.send(self.client.put(url).json(payload)).await?;
        Client::expect_success(response).await?;
        Ok(())
    }

    async fn delete_entry(&self, remote_id: &RemoteId) -> Result<(), RemoteError> {
        let url = self.client.endpoint(&["entries", remote_id.as_str()])?;
        let response = self.client.send(self.client.delete(url)).await?;
        Client::expect_success(response).await?;
        Ok(())
    }

    async fn list_entries_since(
        &self,
        checkpoint: Option<&str>,
    ) -> Result<RemoteChangeSet, RemoteError> {
        let url = self.client.endpoint(&["entries"])?;
        let mut request = self.client.get(url);
        if let Some(since) = checkpoint {
            request = request.query(&[("since", since)]);
        }
        let response = self.client.send(request).await?;
        Ok(Self::ok_json(response).await?)
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<RemoteId>, RemoteError> {
        let entry_time = DateTime::from_timestamp_millis(key.entry_time.as_millis())
            .ok_or_else(|| RemoteError::Permanent(format!("entry time of {} out of range", key)))?
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let url = self.client.endpoint(&["entries", "lookup"])?;
        let request = self.client.get(url).query(&[
            ("vehicle_number", key.vehicle_number.as_str()),
            ("entry_time", entry_time.as_str()),
        ]);
        let response = self.client.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: IdBody = Self::ok_json(response).await?;
        Ok(body.remote_id())
    }
}
