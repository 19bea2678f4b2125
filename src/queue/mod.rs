//! The `queue` module provides the bounded work queue the broker uses for
//! every delivery that crosses a thread boundary.
//!
//! A queue owns one or more shards. Each shard is a bounded channel served by
//! a fixed number of worker threads. Items are routed to a shard by a
//! pluggable `ShardStrategy`, so all items with the same shard key are
//! processed in submission order when a shard has a single worker.

pub mod pool;

pub use pool::{
    Handler, KeyedShard, QueueOptions, RetryPolicy, ShardStrategy, SingleShard, WorkQueue,
};
