//! Core library for the MARLIN fluidics controller.
//!
//! This library drives the microfluidic reagent-delivery instrument through a
//! multi-cycle FISH protocol. It finds the device on a serial port, keeps a
//! local mirror of its valve, pump and routing state consistent through a
//! command-and-verify handshake, and sequences fixation and hybridization
//! cycles around a microscope collaborator.
//!
//! Dependency order: [`routing`] → [`transport`] → [`protocol`] → [`recipe`]
//! → [`imaging`] (interface only).

pub mod config;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod protocol;
pub mod recipe;
pub mod routing;
pub mod state;
pub mod transport;
