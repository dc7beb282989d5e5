//! Packet-run arithmetic: packed weight, loss grossing, bag counts.

use serde::{Deserialize, Serialize};

use packhouse_core::WeightUnit;

use crate::settings::PackhouseSettings;

/// One packing run: how many packets of what size are being filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingRun {
    pub packets: u32,
    /// Weight of a single packet, in `packet_unit`.
    pub packet_weight: f64,
    pub packet_unit: WeightUnit,
}

impl PackingRun {
    pub fn new(packets: u32, packet_weight: f64, packet_unit: WeightUnit) -> Self {
        Self {
            packets,
            packet_weight,
            packet_unit,
        }
    }

    /// Net kilograms leaving in packets.
    ///
    /// A malformed packet weight (negative or non-finite) counts as zero, so
    /// a bad form entry yields an empty run rather than nonsense downstream.
    pub fn packed_weight(&self) -> f64 {
        let per_packet = if self.packet_weight.is_finite() && self.packet_weight > 0.0 {
            self.packet_weight
        } else {
            0.0
        };
        self.packet_unit
            .to_kilograms(per_packet * f64::from(self.packets))
    }

    /// Kilograms to draw from WIP: the packed weight grossed up by the loss
    /// percentage configured for `product_type`.
    pub fn required_weight(&self, settings: &PackhouseSettings, product_type: &str) -> f64 {
        let loss = settings.loss_percent_for(product_type);
        self.packed_weight() * (1.0 + loss / 100.0)
    }

    /// Intake bags needed to stage the packed weight, rounded up.
    ///
    /// A non-positive configured bag weight yields zero instead of dividing
    /// by it.
    pub fn bags_required(&self, settings: &PackhouseSettings) -> u32 {
        if settings.bag_weight <= 0.0 {
            return 0;
        }
        (self.packed_weight() / settings.bag_weight).ceil() as u32
    }
}
