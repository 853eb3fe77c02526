//! Service integrations for external APIs and clients.
//!
//! This module contains the remote platform integration used by the teams-bridge.
//! The module defines both a generic trait and a concrete (Graph) implementation,
//! allowing for extensibility and easy testing.

pub mod teams;
