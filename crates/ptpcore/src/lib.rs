#![cfg_attr(not(any(test, feature = "std")), no_std)]
//! `ptpcore` is a single-port IEEE 1588 (PTPv2) clock synchronization engine.
//!
//! The crate holds the protocol logic only: message codec, best master clock algorithm,
//! slave and master roles, clock servos and the dispatcher that drives them. Sockets, timers,
//! timestamping hardware and log output live behind small traits and are supplied by the
//! embedding application.
//!
//! ## Where to start
//!
//! - Engine, notification FIFO and configuration: [`engine::Engine`]
//! - What the roles see of the engine: [`port::Port`]
//! - BMCA: [`bmca`]
//! - Roles: [`slave::Slave`], [`master::Master`]
//! - Clock discipline: [`servo`], [`clock::LocalClock`]
//! - Wire format: [`wire`], [`message::RawPtpMessage`]
//!
//! For a complete host wiring on tokio, see the `ptpcore-daemon` crate in this repository.
//!
//! ## `no_std`
//!
//! The core supports `no_std` when the `std` feature is disabled. All storage is fixed
//! capacity; floating point math goes through `libm`.
//!
//! # Feature flags
//!
//! - `std` (default): enables standard-library support.
//! - `test-support`: fake clocks, networks, log sinks and ports for driving the engine in tests.

pub mod bmca;
pub mod clock;
pub mod compose;
pub mod config;
pub mod engine;
pub mod kalman;
pub mod log;
pub mod master;
pub mod message;
pub mod msgbuf;
pub mod network;
pub mod port;
pub mod profile;
pub mod result;
pub mod servo;
pub mod settings;
pub mod slave;
pub mod stats;
pub mod sync;
pub mod time;
pub mod tlv;
pub mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
