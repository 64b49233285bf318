// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-level servers. Both drive the same [`crate::engine::Engine`];
//! they differ only in how they frame bytes off the wire.

pub mod rtu;
pub mod tcp;
