// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

pub mod api;
pub mod capture;
pub mod config;
pub mod decorate;
pub mod json_walk;
pub mod names;
pub mod session;
pub mod store;
pub mod stream;
pub mod upstream;
