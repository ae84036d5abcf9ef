/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Persisted per-container records.
//!
//! The worker writes one [`ContainerRecord`] file per container and
//! replays them after a restart. Configuration is stored as the raw
//! property strings the client set, so replay goes through the same
//! parsers as a live `SetProperty`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertyEntry {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerRecord {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub owner_uid: u32,
    #[prost(uint32, tag = "3")]
    pub owner_gid: u32,
    /// Only explicitly-set properties; defaults are not materialized.
    #[prost(message, repeated, tag = "4")]
    pub properties: ::prost::alloc::vec::Vec<PropertyEntry>,
    /// Stored state name (`stopped`, `running`, `paused`, `dead`).
    #[prost(string, tag = "5")]
    pub state: ::prost::alloc::string::String,
    #[prost(int32, tag = "6")]
    pub root_pid: i32,
    #[prost(sint32, optional, tag = "7")]
    pub exit_status: ::core::option::Option<i32>,
    #[prost(bool, tag = "8")]
    pub oom_killed: bool,
    #[prost(uint32, tag = "9")]
    pub respawn_count: u32,
    /// Wall-clock milliseconds; zero when the container never died.
    #[prost(uint64, tag = "10")]
    pub death_time_ms: u64,
    #[prost(string, tag = "11")]
    pub stdout_path: ::prost::alloc::string::String,
    #[prost(string, tag = "12")]
    pub stderr_path: ::prost::alloc::string::String,
}
