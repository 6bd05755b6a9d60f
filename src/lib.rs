#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Conclave
//! Conclave is a signaling and session-orchestration library for WebRTC SFU servers. It keeps the server-side bookkeeping of rooms, member sessions, transports and producer/consumer relationships, and drives an external media engine through a narrow async interface. Media itself never flows through this crate, only the control plane does.
//!
//! ## Usage
//! Mount the [`gateway::SignalingGateway`] into an [`actix_web`] application and hand it a [`registry::RoomRegistry`] backed by your media engine. [`loopback::LoopbackEngine`] is an in-process engine for tests and demos.

mod broker;
/// Configuration for [`registry::RoomRegistry`] and the rooms it creates.
pub mod config;
/// The media engine interface. Implement these traits to drive a real SFU engine.
pub mod engine;
pub mod error;
/// WebSocket signaling endpoint for [`actix_web`].
pub mod gateway;
mod graph;
/// An in-process media engine without any networking, for tests and demos.
pub mod loopback;
pub mod message;
/// Registry is a module that decides which rooms exist.
pub mod registry;
/// Room is a module that orders every state change of one conference.
pub mod room;
/// Session bookkeeping for connected peers.
pub mod session;
