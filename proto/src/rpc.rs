/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Request/response records for the daemon socket.
//!
//! A client sends one [`ContainerRequest`] with exactly one operation
//! field set and receives one [`ContainerResponse`]. Responses always
//! carry an [`Error`] kind; payload fields are set only on success.

/// Wire error kinds. Every response carries one of these.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum Error {
    Success = 0,
    Unknown = 1,
    InvalidValue = 2,
    InvalidCommand = 3,
    InvalidPath = 4,
    InvalidState = 5,
    InvalidProperty = 6,
    InvalidData = 7,
    ContainerDoesNotExist = 8,
    ContainerAlreadyExists = 9,
    Permission = 10,
    ResourceNotAvailable = 11,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestroyRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PauseRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResumeRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KillRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub signal: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPropertyRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub property: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPropertyRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub property: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetDataRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub data: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitRequest {
    #[prost(string, repeated, tag = "1")]
    pub names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Target states; empty means "dead".
    #[prost(string, repeated, tag = "2")]
    pub states: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Milliseconds; zero means no deadline.
    #[prost(uint64, tag = "3")]
    pub deadline_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPropertiesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListDataRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVersionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConvertPathRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    /// Container whose view `path` is expressed in; empty means the host.
    #[prost(string, tag = "2")]
    pub source: ::prost::alloc::string::String,
    /// Container whose view the result is expressed in; empty means the host.
    #[prost(string, tag = "3")]
    pub destination: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerRequest {
    #[prost(message, optional, tag = "1")]
    pub create: ::core::option::Option<CreateRequest>,
    #[prost(message, optional, tag = "2")]
    pub destroy: ::core::option::Option<DestroyRequest>,
    #[prost(message, optional, tag = "3")]
    pub list: ::core::option::Option<ListRequest>,
    #[prost(message, optional, tag = "4")]
    pub start: ::core::option::Option<StartRequest>,
    #[prost(message, optional, tag = "5")]
    pub stop: ::core::option::Option<StopRequest>,
    #[prost(message, optional, tag = "6")]
    pub pause: ::core::option::Option<PauseRequest>,
    #[prost(message, optional, tag = "7")]
    pub resume: ::core::option::Option<ResumeRequest>,
    #[prost(message, optional, tag = "8")]
    pub kill: ::core::option::Option<KillRequest>,
    #[prost(message, optional, tag = "9")]
    pub get_property: ::core::option::Option<GetPropertyRequest>,
    #[prost(message, optional, tag = "10")]
    pub set_property: ::core::option::Option<SetPropertyRequest>,
    #[prost(message, optional, tag = "11")]
    pub get_data: ::core::option::Option<GetDataRequest>,
    #[prost(message, optional, tag = "12")]
    pub wait: ::core::option::Option<WaitRequest>,
    #[prost(message, optional, tag = "13")]
    pub list_properties: ::core::option::Option<ListPropertiesRequest>,
    #[prost(message, optional, tag = "14")]
    pub list_data: ::core::option::Option<ListDataRequest>,
    #[prost(message, optional, tag = "15")]
    pub get_version: ::core::option::Option<GetVersionRequest>,
    #[prost(message, optional, tag = "16")]
    pub convert_path: ::core::option::Option<ConvertPathRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListResponse {
    #[prost(string, repeated, tag = "1")]
    pub names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPropertyResponse {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetDataResponse {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitResponse {
    /// The container that matched; empty when the wait timed out.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub state: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub timed_out: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertySchema {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
    /// Settable while the container is running.
    #[prost(bool, tag = "3")]
    pub dynamic: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPropertiesResponse {
    #[prost(message, repeated, tag = "1")]
    pub properties: ::prost::alloc::vec::Vec<PropertySchema>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataSchema {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListDataResponse {
    #[prost(message, repeated, tag = "1")]
    pub data: ::prost::alloc::vec::Vec<DataSchema>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVersionResponse {
    #[prost(string, tag = "1")]
    pub tag: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub revision: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConvertPathResponse {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerResponse {
    #[prost(enumeration = "Error", tag = "1")]
    pub error: i32,
    #[prost(string, tag = "2")]
    pub error_msg: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub list: ::core::option::Option<ListResponse>,
    #[prost(message, optional, tag = "4")]
    pub get_property: ::core::option::Option<GetPropertyResponse>,
    #[prost(message, optional, tag = "5")]
    pub get_data: ::core::option::Option<GetDataResponse>,
    #[prost(message, optional, tag = "6")]
    pub wait: ::core::option::Option<WaitResponse>,
    #[prost(message, optional, tag = "7")]
    pub list_properties: ::core::option::Option<ListPropertiesResponse>,
    #[prost(message, optional, tag = "8")]
    pub list_data: ::core::option::Option<ListDataResponse>,
    #[prost(message, optional, tag = "9")]
    pub get_version: ::core::option::Option<GetVersionResponse>,
    #[prost(message, optional, tag = "10")]
    pub convert_path: ::core::option::Option<ConvertPathResponse>,
}

impl ContainerResponse {
    /// A response carrying only an error kind and message.
    pub fn error_response(error: Error, msg: impl Into<String>) -> Self {
        Self { error: error as i32, error_msg: msg.into(), ..Self::default() }
    }

    /// A success response with no payload.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error_kind(&self) -> Error {
        Error::try_from(self.error).unwrap_or(Error::Unknown)
    }
}
