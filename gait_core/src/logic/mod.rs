//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod connection;
pub mod demux;
pub mod monitor;
pub mod telemetry;
pub mod transport;
