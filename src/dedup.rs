//! Per-sensor deduplication and merge.
//!
//! Hardware sends a different subset of fields each cycle. The table keeps one
//! [`SensorState`] per address holding the union of everything seen since the last flush,
//! later packets overriding same-named fields, so a flush writes the most complete
//! snapshot available.

use crate::packet::{SensorFields, SensorPacket};
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// How an incoming packet relates to what is already known about its sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First packet from this address since the last flush
    New,
    /// Same sequence number as the last packet; its fields are ignored
    DuplicatePacket,
    /// Different sequence number; fields are merged
    UpdatedPacket,
}

/// Buffered state of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    /// Sequence number of the last merged packet
    pub last_sequence: u64,
    /// Union of all fields seen since the last flush
    pub merged_fields: SensorFields,
    /// Reception time of the first packet
    pub first_seen_at: DateTime<Local>,
    /// Reception time of the latest packet, duplicates included
    pub last_seen_at: DateTime<Local>,
}

/// All buffered sensor states, keyed by address.
#[derive(Debug, Default)]
pub struct SensorStateTable {
    states: HashMap<String, SensorState>,
}

impl SensorStateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how a packet with `sequence` from `address` would be treated.
    pub fn classify(&self, address: &str, sequence: u64) -> Classification {
        match self.states.get(address) {
            None => Classification::New,
            Some(state) if state.last_sequence == sequence => Classification::DuplicatePacket,
            Some(_) => Classification::UpdatedPacket,
        }
    }

    /// Merge a packet's fields into its sensor state and return the merged view.
    ///
    /// Field-wise overwrite: fields present in the packet replace earlier values, fields
    /// absent from it are kept.
    pub fn merge(&mut self, packet: &SensorPacket) -> &SensorFields {
        let state = self
            .states
            .entry(packet.address.clone())
            .or_insert_with(|| SensorState {
                last_sequence: packet.sequence,
                merged_fields: SensorFields::new(),
                first_seen_at: packet.received_at,
                last_seen_at: packet.received_at,
            });
        state
            .merged_fields
            .extend(packet.fields.iter().map(|(k, v)| (*k, *v)));
        state.last_sequence = packet.sequence;
        state.last_seen_at = packet.received_at;
        &state.merged_fields
    }

    /// Classify a packet and apply it.
    pub fn observe(&mut self, packet: &SensorPacket) -> Classification {
        let classification = self.classify(&packet.address, packet.sequence);
        match classification {
            Classification::New | Classification::UpdatedPacket => {
                self.merge(packet);
            }
            Classification::DuplicatePacket => {
                if let Some(state) = self.states.get_mut(&packet.address) {
                    state.last_seen_at = packet.received_at;
                }
            }
        }
        classification
    }

    /// State of one address.
    pub fn get(&self, address: &str) -> Option<&SensorState> {
        self.states.get(address)
    }

    /// Number of buffered sensors.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Take every state, leaving the table empty.
    pub fn drain(&mut self) -> Vec<(String, SensorState)> {
        self.states.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FieldKey;

    fn packet(seq: u64, fields: &[(FieldKey, f64)]) -> SensorPacket {
        SensorPacket::new(
            "fd00::1",
            seq,
            Local::now(),
            fields.iter().copied().collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_first_packet_is_new() {
        let mut table = SensorStateTable::new();
        let p = packet(1, &[(FieldKey::Battery, 3000.0)]);
        assert_eq!(table.observe(&p), Classification::New);
        assert_eq!(table.get("fd00::1").unwrap().merged_fields, p.fields);
    }

    #[test]
    fn test_merge_later_packets_take_precedence() {
        let mut table = SensorStateTable::new();
        table.observe(&packet(1, &[(FieldKey::Battery, 3000.0), (FieldKey::Temperature, 20.0)]));
        table.observe(&packet(2, &[(FieldKey::Temperature, 22.0), (FieldKey::Light, 100.0)]));
        let classification =
            table.observe(&packet(3, &[(FieldKey::Humidity, 55.0), (FieldKey::Light, 90.0)]));

        assert_eq!(classification, Classification::UpdatedPacket);
        let state = table.get("fd00::1").unwrap();
        assert_eq!(state.last_sequence, 3);
        assert_eq!(state.merged_fields.get(&FieldKey::Battery), Some(&3000.0));
        assert_eq!(state.merged_fields.get(&FieldKey::Temperature), Some(&22.0));
        assert_eq!(state.merged_fields.get(&FieldKey::Light), Some(&90.0));
        assert_eq!(state.merged_fields.get(&FieldKey::Humidity), Some(&55.0));
    }

    #[test]
    fn test_duplicate_sequence_leaves_fields_unchanged() {
        let mut table = SensorStateTable::new();
        table.observe(&packet(7, &[(FieldKey::Temperature, 20.0)]));
        let before = table.get("fd00::1").unwrap().merged_fields.clone();

        let duplicate = packet(7, &[(FieldKey::Temperature, 99.0)]);
        assert_eq!(table.observe(&duplicate), Classification::DuplicatePacket);

        let state = table.get("fd00::1").unwrap();
        assert_eq!(state.merged_fields, before);
        assert_eq!(state.last_seen_at, duplicate.received_at);
    }

    #[test]
    fn test_lower_sequence_still_updates() {
        // sensors restart their counter after a battery swap
        let mut table = SensorStateTable::new();
        table.observe(&packet(500, &[(FieldKey::Battery, 2600.0)]));
        assert_eq!(
            table.observe(&packet(1, &[(FieldKey::Battery, 3300.0)])),
            Classification::UpdatedPacket
        );
        assert_eq!(table.get("fd00::1").unwrap().last_sequence, 1);
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = SensorStateTable::new();
        table.observe(&packet(1, &[(FieldKey::Battery, 3000.0)]));
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert!(table.is_empty());
        assert_eq!(table.classify("fd00::1", 1), Classification::New);
    }
}
