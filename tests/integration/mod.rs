//! Integration tests for prefork
//!
//! These tests fork real worker processes from the test binary and talk to
//! them over loopback TCP. Every test takes the lock from
//! [`helpers::serial`], so they run one at a time.
//!
//! Run with: cargo test --test integration

mod helpers;

mod pool;
mod worker_loop;
