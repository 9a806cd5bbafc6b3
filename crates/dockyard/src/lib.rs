// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dockyard - functions as containers.
//!
//! A function is a user-registered unit of code: a code type (language
//! runtime template), dependencies, build commands, environment, volumes and
//! an optional schedule. Dockyard turns each function into a container image
//! and runs it as a short-lived container on demand or on a timer.
//!
//! # Architecture
//!
//! ```text
//!   HTTP API (server)          timers (scheduler)
//!          │                         │
//!          ▼                         ▼
//!   FunctionService ──────────► RunService ──► run records (persistence)
//!          │                         │
//!          │                         ▼
//!          │                   FunctionRunner ──► log files (storage)
//!          │                         │
//!          ▼                         ▼
//!     ImageBuilder ◄─────────────────┘
//!          │
//!          ▼
//!  DockerfileGenerator
//!          │
//!          ▼
//!     EngineClient ──► ContainerEngine (Docker via bollard, or MockEngine)
//! ```
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Container engine contract, retrying command layer, Docker and mock engines |
//! | [`dockerfile`] | Dockerfile rendering and content-addressed caching |
//! | [`image_builder`] | At most one build per function, skip when inputs are unchanged |
//! | [`runner`] | Container run lifecycle with timeout and log capture |
//! | [`scheduler`] | Cron and fixed-delay timers keyed by id |
//! | [`functions`], [`runs`], [`run_logs`] | Registry, tracked runs and log reading |
//! | [`maintenance`] | Image refresh, retention and bootstrap |
//! | [`runtime`], [`server`] | Wiring, lifecycle and HTTP API |

pub mod code_types;
pub mod config;
pub mod deployment;
pub mod dockerfile;
pub mod engine;
pub mod error;
pub mod functions;
pub mod image_builder;
pub mod maintenance;
pub mod model;
pub mod persistence;
pub mod retry;
pub mod run_logs;
pub mod runner;
pub mod runs;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
