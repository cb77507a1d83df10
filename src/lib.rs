//! # hostresolver
//!
//! A Chromium-inspired host resolver for Rust.
//!
//! `hostresolver` reproduces the scheduling behaviour of Chromium's host
//! resolver: lookups for the same name share one job, jobs run through a
//! bounded priority queue, and answers come from an asynchronous DNS client
//! with the blocking system resolver as fallback.
//!
//! ## Features
//!
//! - **Deduplication**: one job per (host, family, flags), any number of waiters
//! - **Prioritized dispatch**: 6 concurrent resolutions by default, bounded queue with eviction
//! - **Dual path**: A/AAAA over hickory-resolver, `getaddrinfo` retries with backoff
//! - **Host cache**: TTL and network-generation aware, stale reads, JSON persistence
//! - **Network changes**: running jobs abort on address changes, DNS tasks restart on config changes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hostresolver::base::priority::RequestPriority;
//! use hostresolver::dns::{HostPortPair, HostResolver, RequestInfo};
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = HostResolver::builder().system_dns().build();
//!     let info = RequestInfo::new(HostPortPair::new("example.com", 443));
//!     let addrs = resolver
//!         .resolve(info, RequestPriority::Medium)
//!         .await
//!         .into_result()
//!         .await
//!         .unwrap();
//!     println!("{:?}", addrs);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors, priorities, the dispatcher and network types
//! - [`dns`] - The resolver, its tasks, cache and configuration

pub mod base;
pub mod dns;
