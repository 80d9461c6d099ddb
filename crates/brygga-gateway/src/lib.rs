// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! brygga's HTTP surface.
//!
//! Exposes the per-request pipeline behind two streaming endpoints plus a
//! readiness probe.  The heavy lifting — child supervision, the session
//! mini-language, MCP validation — lives in `brygga-core` and `brygga-mcp`;
//! this crate owns admission (auth, validation), the OpenAI request/response
//! adaptation, and response streaming.

pub mod adapter;
pub mod coordinator;
pub mod files;
pub mod http;
pub mod translator;
pub mod validate;

pub use http::{router, serve, AppState};
