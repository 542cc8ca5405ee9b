// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Segment descriptors
//!
//! Structured description of one segment as produced by a template layer.
//! Descriptors are plain serde types; [`SegmentDescriptor::validate`] runs
//! before any buffer is allocated.

use core::fmt;
use core::str::FromStr;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::records::{Position, SegmentSettings};
use crate::types::{Result, SegmentError};

/// Role of a brick inside its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrickType {
    Input,
    Normal,
    Output,
}

impl FromStr for BrickType {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(BrickType::Input),
            "normal" => Ok(BrickType::Normal),
            "output" => Ok(BrickType::Output),
            other => Err(SegmentError::UnknownBrickType(other.to_string())),
        }
    }
}

impl fmt::Display for BrickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrickType::Input => write!(f, "input"),
            BrickType::Normal => write!(f, "normal"),
            BrickType::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickDescriptor {
    #[serde(rename = "type")]
    pub brick_type: BrickType,
    pub position: [i32; 3],
    pub number_of_neurons: u32,
}

impl BrickDescriptor {
    pub fn new(brick_type: BrickType, position: [i32; 3], number_of_neurons: u32) -> Self {
        Self {
            brick_type,
            position,
            number_of_neurons,
        }
    }
}

/// Per-segment settings as written in a descriptor
///
/// Every field is optional in the serialized form and falls back to the
/// engine defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDescriptor {
    pub max_synapse_sections: u64,
    pub cool_down: f32,
    pub potential_overflow: f32,
    pub sign_neg: f32,
    pub synapse_segmentation: f32,
    pub learn_rate: f32,
    pub neuron_border: f32,
    pub refraction_time: u32,
    pub max_active_counter: u32,
    pub min_active_counter: u32,
    pub do_learn: bool,
}

impl Default for SettingsDescriptor {
    fn default() -> Self {
        let defaults = SegmentSettings::default();
        Self {
            max_synapse_sections: defaults.max_synapse_sections,
            cool_down: defaults.cool_down,
            potential_overflow: defaults.potential_overflow,
            sign_neg: defaults.sign_neg,
            synapse_segmentation: defaults.synapse_segmentation,
            learn_rate: defaults.learn_rate,
            neuron_border: defaults.neuron_border,
            refraction_time: defaults.refraction_time,
            max_active_counter: defaults.max_active_counter,
            min_active_counter: defaults.min_active_counter,
            do_learn: defaults.do_learn != 0,
        }
    }
}

impl SettingsDescriptor {
    /// In-buffer settings record
    pub fn to_settings(&self) -> SegmentSettings {
        SegmentSettings {
            max_synapse_sections: self.max_synapse_sections,
            cool_down: self.cool_down,
            potential_overflow: self.potential_overflow,
            sign_neg: self.sign_neg,
            synapse_segmentation: self.synapse_segmentation,
            learn_rate: self.learn_rate,
            neuron_border: self.neuron_border,
            refraction_time: self.refraction_time,
            max_active_counter: self.max_active_counter,
            min_active_counter: self.min_active_counter,
            do_learn: self.do_learn as u32,
        }
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if self.max_synapse_sections == 0 || self.max_synapse_sections > u32::MAX as u64 - 1 {
            errors.push(format!(
                "max_synapse_sections must be in 1..{}, got {}",
                u32::MAX,
                self.max_synapse_sections
            ));
        }
        if !(self.cool_down > 0.0) {
            errors.push(format!("cool_down must be > 0, got {}", self.cool_down));
        }
        if !(self.synapse_segmentation > 0.0) {
            errors.push(format!(
                "synapse_segmentation must be > 0, got {}",
                self.synapse_segmentation
            ));
        }
        if !(0.0..=1.0).contains(&self.sign_neg) {
            errors.push(format!("sign_neg must be in [0, 1], got {}", self.sign_neg));
        }
        if !self.potential_overflow.is_finite() || !self.learn_rate.is_finite() {
            errors.push("potential_overflow and learn_rate must be finite".to_string());
        }
        if !(self.neuron_border >= 0.0) {
            errors.push(format!("neuron_border must be >= 0, got {}", self.neuron_border));
        }
        if self.max_active_counter == 0 || self.max_active_counter > u16::MAX as u32 {
            errors.push(format!(
                "max_active_counter must be in 1..={}, got {}",
                u16::MAX,
                self.max_active_counter
            ));
        }
        if self.min_active_counter > self.max_active_counter {
            errors.push(format!(
                "min_active_counter ({}) exceeds max_active_counter ({})",
                self.min_active_counter, self.max_active_counter
            ));
        }
        if self.refraction_time > u16::MAX as u32 {
            errors.push(format!(
                "refraction_time must fit 16 bits, got {}",
                self.refraction_time
            ));
        }
    }
}

/// Complete description of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    #[serde(default)]
    pub position: [i32; 3],
    #[serde(default)]
    pub settings: SettingsDescriptor,
    pub bricks: Vec<BrickDescriptor>,
}

impl SegmentDescriptor {
    pub fn new(bricks: Vec<BrickDescriptor>) -> Self {
        Self {
            position: [0; 3],
            settings: SettingsDescriptor::default(),
            bricks,
        }
    }

    pub fn with_settings(mut self, settings: SettingsDescriptor) -> Self {
        self.settings = settings;
        self
    }

    pub fn position(&self) -> Position {
        Position::from(self.position)
    }

    /// Total neurons of all bricks of one type
    pub fn neurons_of(&self, brick_type: BrickType) -> u64 {
        self.bricks
            .iter()
            .filter(|brick| brick.brick_type == brick_type)
            .map(|brick| brick.number_of_neurons as u64)
            .sum()
    }

    pub fn total_neurons(&self) -> u64 {
        self.bricks.iter().map(|brick| brick.number_of_neurons as u64).sum()
    }

    /// Check the descriptor, reporting every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.bricks.is_empty() {
            errors.push("segment has no bricks".to_string());
        }
        let mut positions = AHashSet::with_capacity(self.bricks.len());
        for (index, brick) in self.bricks.iter().enumerate() {
            if brick.number_of_neurons == 0 {
                errors.push(format!("brick {} has no neurons", index));
            }
            if !positions.insert(brick.position) {
                errors.push(format!(
                    "brick {} reuses position {:?}",
                    index, brick.position
                ));
            }
        }
        if self.total_neurons() >= u32::MAX as u64 {
            errors.push(format!(
                "{} neurons exceed the addressable range",
                self.total_neurons()
            ));
        }
        self.settings.validate(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SegmentError::InvalidDescriptor(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegmentDescriptor {
        SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
            BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 8),
            BrickDescriptor::new(BrickType::Output, [2, 0, 0], 2),
        ])
    }

    #[test]
    fn test_brick_type_from_str() {
        assert_eq!("Input".parse::<BrickType>().unwrap(), BrickType::Input);
        assert_eq!("output".parse::<BrickType>().unwrap(), BrickType::Output);
        assert_eq!(
            "sideways".parse::<BrickType>(),
            Err(SegmentError::UnknownBrickType("sideways".to_string()))
        );
    }

    #[test]
    fn test_neuron_totals() {
        let descriptor = sample();
        assert!(descriptor.validate().is_ok());
        assert_eq!(descriptor.total_neurons(), 14);
        assert_eq!(descriptor.neurons_of(BrickType::Input), 4);
        assert_eq!(descriptor.neurons_of(BrickType::Output), 2);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut descriptor = sample();
        descriptor.bricks[1].number_of_neurons = 0;
        descriptor.bricks[2].position = [0, 0, 0];
        descriptor.settings.cool_down = 0.0;

        let Err(SegmentError::InvalidDescriptor(message)) = descriptor.validate() else {
            panic!("expected invalid descriptor");
        };
        assert!(message.contains("no neurons"));
        assert!(message.contains("reuses position"));
        assert!(message.contains("cool_down"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "bricks": [
                { "type": "input", "position": [0, 0, 0], "number_of_neurons": 2 },
                { "type": "output", "position": [1, 0, 0], "number_of_neurons": 1 }
            ],
            "settings": { "cool_down": 50.0 }
        }"#;
        let descriptor: SegmentDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.settings.cool_down, 50.0);
        assert_eq!(
            descriptor.settings.max_synapse_sections,
            SettingsDescriptor::default().max_synapse_sections
        );
        assert_eq!(descriptor.bricks[1].brick_type, BrickType::Output);
    }

    #[test]
    fn test_unknown_type_fails_to_deserialize() {
        let json = r#"{ "bricks": [ { "type": "hidden", "position": [0,0,0], "number_of_neurons": 1 } ] }"#;
        assert!(serde_json::from_str::<SegmentDescriptor>(json).is_err());
    }
}
