// Copyright [2026] [Datacapsule Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use datacapsule_daemon::config::ServerConfig;
use datacapsule_daemon::keys::load_or_create_signing_key;
use datacapsule_daemon::server::{serve, ServerCtx};
use datacapsule_daemon::state::CapsuleRegistry;
use datacapsule_daemon::storage::CapsuleStore;

#[derive(Debug, Parser)]
#[command(name = "datacapsule-daemon")]
#[command(about = "Datacapsule storage daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4410")]
    listen: String,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[arg(long, default_value_t = 2)]
    merkle_fanout: usize,

    #[arg(long, default_value_t = 1024)]
    hash_cache_capacity: usize,

    /// Extra hashes worth sending to avoid one signature; 0 disables.
    #[arg(long, default_value_t = 0)]
    sig_avoid_max_extra_hashes: usize,

    #[arg(long, default_value_t = datacapsule_protocol::DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let config = ServerConfig {
        merkle_fanout: args.merkle_fanout,
        hash_cache_capacity: args.hash_cache_capacity,
        sig_avoid_max_extra_hashes: args.sig_avoid_max_extra_hashes,
        max_frame_bytes: args.max_frame_bytes,
    };
    config.validate()?;

    std::fs::create_dir_all(&args.data_dir)?;
    let data_dir = std::path::Path::new(&args.data_dir);
    let store = CapsuleStore::open(data_dir.join("capsules.redb"))?;
    let registry = CapsuleRegistry::load(&store)?;
    let signing_key = load_or_create_signing_key(data_dir)?;

    let addr: SocketAddr = args.listen.parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        %addr,
        data_dir = %args.data_dir,
        merkle_fanout = config.merkle_fanout,
        hash_cache_capacity = config.hash_cache_capacity,
        sig_avoid_max_extra_hashes = config.sig_avoid_max_extra_hashes,
        "datacapsule daemon listening"
    );

    let ctx = Arc::new(ServerCtx {
        config,
        store,
        registry,
        signing_key,
    });
    serve(listener, ctx).await?;
    Ok(())
}
