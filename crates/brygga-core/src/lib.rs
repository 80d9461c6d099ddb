// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod command;
mod events;
mod registry;
mod request;
mod session;
mod supervisor;
mod workspace;

pub use command::build_child_args;
pub use events::{classify_line, ChildEvent, ContentBlock, ParsedLine};
pub use registry::{ActiveRegistry, SupervisorControl};
pub use request::NormalizedRequest;
pub use session::SessionConfig;
pub use supervisor::{
    SpawnError, Supervisor, SupervisorEvent, SupervisorSettings, TimeoutKind,
};
pub use workspace::{resolve_workspace, WorkspaceError};
