/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Typed client for the portod socket.
//!
//! One method per request; API-level failures surface as
//! [`ClientError::Api`] carrying the daemon's error kind and message.

#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(clippy::unwrap_used)]

use porto_proto::codec;
use porto_proto::rpc::{
    ContainerRequest, ContainerResponse, ConvertPathRequest, CreateRequest,
    DestroyRequest, GetDataRequest, GetPropertyRequest, GetVersionRequest,
    KillRequest, ListDataRequest, ListDataResponse, ListPropertiesRequest,
    ListPropertiesResponse, ListRequest, PauseRequest, ResumeRequest,
    SetPropertyRequest, StartRequest, StopRequest, WaitRequest, WaitResponse,
};
use porto_proto::Error as ApiError;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::net::UnixStream;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("request failed: {error:?}: {msg}")]
    Api { error: ApiError, msg: String },
    #[error("malformed response: {0}")]
    Protocol(&'static str),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug)]
pub struct PortoClient {
    stream: UnixStream,
}

impl PortoClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self { stream })
    }

    async fn call(&mut self, request: ContainerRequest) -> Result<ContainerResponse> {
        codec::write_message(&mut self.stream, &request).await?;

        let response: ContainerResponse =
            codec::read_message(&mut self.stream)
                .await?
                .ok_or(ClientError::Protocol("connection closed"))?;

        match response.error_kind() {
            ApiError::Success => Ok(response),
            error => {
                Err(ClientError::Api { error, msg: response.error_msg })
            }
        }
    }

    pub async fn create(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                create: Some(CreateRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn destroy(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                destroy: Some(DestroyRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        let response = self
            .call(ContainerRequest {
                list: Some(ListRequest {}),
                ..ContainerRequest::default()
            })
            .await?;

        Ok(response
            .list
            .ok_or(ClientError::Protocol("missing list payload"))?
            .names)
    }

    pub async fn start(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                start: Some(StartRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                stop: Some(StopRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn pause(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                pause: Some(PauseRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn resume(&mut self, name: &str) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                resume: Some(ResumeRequest { name: name.to_string() }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn kill(&mut self, name: &str, signal: i32) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                kill: Some(KillRequest { name: name.to_string(), signal }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn get_property(
        &mut self,
        name: &str,
        property: &str,
    ) -> Result<String> {
        let response = self
            .call(ContainerRequest {
                get_property: Some(GetPropertyRequest {
                    name: name.to_string(),
                    property: property.to_string(),
                }),
                ..ContainerRequest::default()
            })
            .await?;

        Ok(response
            .get_property
            .ok_or(ClientError::Protocol("missing property payload"))?
            .value)
    }

    pub async fn set_property(
        &mut self,
        name: &str,
        property: &str,
        value: &str,
    ) -> Result<()> {
        let _ = self
            .call(ContainerRequest {
                set_property: Some(SetPropertyRequest {
                    name: name.to_string(),
                    property: property.to_string(),
                    value: value.to_string(),
                }),
                ..ContainerRequest::default()
            })
            .await?;
        Ok(())
    }

    pub async fn get_data(&mut self, name: &str, data: &str) -> Result<String> {
        let response = self
            .call(ContainerRequest {
                get_data: Some(GetDataRequest {
                    name: name.to_string(),
                    data: data.to_string(),
                }),
                ..ContainerRequest::default()
            })
            .await?;

        Ok(response
            .get_data
            .ok_or(ClientError::Protocol("missing data payload"))?
            .value)
    }

    /// Waits for the first of `names` (or their descendants) to reach
    /// one of `states` (`dead` when empty). A zero deadline waits
    /// forever.
    pub async fn wait(
        &mut self,
        names: &[&str],
        states: &[&str],
        deadline_ms: u64,
    ) -> Result<WaitResponse> {
        let response = self
            .call(ContainerRequest {
                wait: Some(WaitRequest {
                    names: names.iter().map(|s| s.to_string()).collect(),
                    states: states.iter().map(|s| s.to_string()).collect(),
                    deadline_ms,
                }),
                ..ContainerRequest::default()
            })
            .await?;

        response.wait.ok_or(ClientError::Protocol("missing wait payload"))
    }

    pub async fn list_properties(&mut self) -> Result<ListPropertiesResponse> {
        let response = self
            .call(ContainerRequest {
                list_properties: Some(ListPropertiesRequest {}),
                ..ContainerRequest::default()
            })
            .await?;

        response
            .list_properties
            .ok_or(ClientError::Protocol("missing schema payload"))
    }

    pub async fn list_data(&mut self) -> Result<ListDataResponse> {
        let response = self
            .call(ContainerRequest {
                list_data: Some(ListDataRequest {}),
                ..ContainerRequest::default()
            })
            .await?;

        response
            .list_data
            .ok_or(ClientError::Protocol("missing schema payload"))
    }

    pub async fn version(&mut self) -> Result<(String, String)> {
        let response = self
            .call(ContainerRequest {
                get_version: Some(GetVersionRequest {}),
                ..ContainerRequest::default()
            })
            .await?;

        let version = response
            .get_version
            .ok_or(ClientError::Protocol("missing version payload"))?;
        Ok((version.tag, version.revision))
    }

    /// Re-expresses `path` from `source`'s filesystem view in
    /// `destination`'s view; empty names mean the host.
    pub async fn convert_path(
        &mut self,
        path: &str,
        source: &str,
        destination: &str,
    ) -> Result<String> {
        let response = self
            .call(ContainerRequest {
                convert_path: Some(ConvertPathRequest {
                    path: path.to_string(),
                    source: source.to_string(),
                    destination: destination.to_string(),
                }),
                ..ContainerRequest::default()
            })
            .await?;

        Ok(response
            .convert_path
            .ok_or(ClientError::Protocol("missing path payload"))?
            .path)
    }
}

impl PortoClient {
    /// The daemon's error kind for a failed call, if any.
    pub fn api_error(result: &ClientError) -> Option<ApiError> {
        match result {
            ClientError::Api { error, .. } => Some(*error),
            _ => None,
        }
    }
}
