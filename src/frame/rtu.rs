// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU header types.

use crate::frame::SlaveId;

/// The leading address byte of an RTU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub slave_id: SlaveId,
}
