// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The single registry of database operations shared by every front-end.
//!
//! A CLI subcommand, an HTTP route, and an MCP `tools/call` all reduce to
//! the same thing: a tool name plus JSON arguments, dispatched here. This
//! is the one place that enforces schemas, capability gating and the flat
//! error taxonomy.

mod descriptor;
mod invokers;
mod registry;
mod schema;

pub use descriptor::{Capability, ToolCallResult, ToolContent, ToolDescriptor};
pub use registry::{ToolContext, ToolRegistry};
