// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The on-disk snapshot format: `{"slaves": {"<id>": {coils, ...}}}`.
//! Lossless round-trip is the only contract the datastore promises; the
//! history is never persisted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::frame::SlaveId;

/// Accessor trait so the snapshot module never needs to know the
/// datastore's private block representation.
pub trait SlaveBlock {
    fn coils(&self) -> &[bool];
    fn discrete_inputs(&self) -> &[bool];
    fn holding_registers(&self) -> &[u16];
    fn input_registers(&self) -> &[u16];
    fn from_parts(
        coils: Vec<bool>,
        discrete_inputs: Vec<bool>,
        holding_registers: Vec<u16>,
        input_registers: Vec<u16>,
    ) -> Self;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveSnapshot {
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

/// A lossless, point-in-time copy of every slave's data spaces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub slaves: HashMap<String, SlaveSnapshot>,
}

impl Snapshot {
    pub(super) fn from_slaves<B: SlaveBlock>(slaves: &HashMap<SlaveId, B>) -> Self {
        let slaves = slaves
            .iter()
            .map(|(id, block)| {
                (
                    id.to_string(),
                    SlaveSnapshot {
                        coils: block.coils().to_vec(),
                        discrete_inputs: block.discrete_inputs().to_vec(),
                        holding_registers: block.holding_registers().to_vec(),
                        input_registers: block.input_registers().to_vec(),
                    },
                )
            })
            .collect();
        Self { slaves }
    }

    pub(super) fn to_slaves<B: SlaveBlock>(&self) -> HashMap<SlaveId, B> {
        self.slaves
            .iter()
            .filter_map(|(id, snap)| {
                let id: SlaveId = id.parse().ok()?;
                Some((
                    id,
                    B::from_parts(
                        snap.coils.clone(),
                        snap.discrete_inputs.clone(),
                        snap.holding_registers.clone(),
                        snap.input_registers.clone(),
                    ),
                ))
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBlock {
        coils: Vec<bool>,
        discrete_inputs: Vec<bool>,
        holding_registers: Vec<u16>,
        input_registers: Vec<u16>,
    }

    impl SlaveBlock for FakeBlock {
        fn coils(&self) -> &[bool] {
            &self.coils
        }
        fn discrete_inputs(&self) -> &[bool] {
            &self.discrete_inputs
        }
        fn holding_registers(&self) -> &[u16] {
            &self.holding_registers
        }
        fn input_registers(&self) -> &[u16] {
            &self.input_registers
        }
        fn from_parts(
            coils: Vec<bool>,
            discrete_inputs: Vec<bool>,
            holding_registers: Vec<u16>,
            input_registers: Vec<u16>,
        ) -> Self {
            Self { coils, discrete_inputs, holding_registers, input_registers }
        }
    }

    #[test]
    fn json_shape_matches_contract() {
        let mut slaves = HashMap::new();
        slaves.insert(
            1u8,
            FakeBlock {
                coils: vec![true, false],
                discrete_inputs: vec![false],
                holding_registers: vec![42],
                input_registers: vec![],
            },
        );
        let snap = Snapshot::from_slaves(&slaves);
        let json = snap.to_json().unwrap();
        assert!(json.contains("\"slaves\""));
        assert!(json.contains("\"1\""));
        assert!(json.contains("\"holding_registers\""));

        let parsed = Snapshot::from_json(&json).unwrap();
        let back: HashMap<u8, FakeBlock> = parsed.to_slaves();
        assert_eq!(back[&1].holding_registers, vec![42]);
    }
}
