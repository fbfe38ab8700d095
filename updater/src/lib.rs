//! # Datadog package updater library
//!
//! This library installs, upgrades, rolls back and garbage-collects versioned
//! Datadog packages on a host. Every managed package keeps two installation
//! slots: a `stable` slot that is always runnable and an `experiment` slot
//! used for canary validation. The embedding process (CLI or control loop)
//! drives the [`installer::Installer`], which is fed by a remote-config
//! backed [`catalog::CatalogClient`].

pub mod catalog;
pub mod defaults;
pub mod installer;
pub mod oci;
pub mod package;
pub mod remote_config;
pub mod repository;
pub mod utils;
