// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod api;
pub mod buffer;
pub mod coordinator;
pub mod retention;
pub mod ratelimit;
pub mod server;
pub mod telemetry;
pub mod runtime;
