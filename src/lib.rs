//! Device model and domain XML codec for grustyvman.
//!
//! Decodes a libvirt `<domain>` definition into typed devices, keeps every
//! part it does not understand, validates devices against the hypervisor's
//! domain capabilities and round-trips edits through an external editor.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
