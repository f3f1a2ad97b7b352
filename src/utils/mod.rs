// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Utility modules
//!
//! Common utilities for the teleflow CLI.

pub mod spinner;

pub use spinner::*;
