// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails rotated event logs of several applications and ships every record
//! as a JSON document to an HTTP document store.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod event;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod rotation;
pub mod sink;
pub mod tailer;
