// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Advertiser management and hourly/daily ad statistics rollups.

pub mod admin;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod query;
pub mod rollup;
pub mod schedule;
