// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Advertiser management and ad statistics rollups.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    ad_stats::dispatch::dispatch().await
}
