//! NeuroGait streaming client core.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod capture;
pub mod config;
pub mod display;
pub mod error;
pub mod history;
pub mod logic;
pub mod protocol;
pub mod scoring;
pub mod session;
pub mod view;
