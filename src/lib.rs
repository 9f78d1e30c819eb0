// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod config;
pub mod stream;
pub mod transport;
