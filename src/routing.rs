//! Reagent routing table.
//!
//! The device selects a reagent line by pointing five cascaded multiplexer
//! stages at it. Each reagent is therefore identified on the wire by a
//! [`RoutingVector`] of five selector indices. [`RoutingTable`] holds the
//! bidirectional mapping between reagent names and vectors and is validated
//! once at construction: no two reagents may share a vector.

use crate::error::{AppResult, MarlinError};
use std::collections::HashMap;
use std::fmt;

/// Number of multiplexer stages addressed by a routing vector.
pub const ROUTING_STAGES: usize = 5;

/// Saline wash buffer.
pub const SSC: &str = "SSC";
/// Fixative (paraformaldehyde in half methanol/acetic acid).
pub const PFA: &str = "PFA(half-MeAc)";
/// Ethanol permeabilisation buffer.
pub const ETOH: &str = "EtOH(MeAc)";
/// Imaging buffer.
pub const IMAGE: &str = "Image";
/// Cleavage buffer that strips the previous cycle's probes.
pub const CLEAVE: &str = "Cleave";

/// Largest selector a routing frame can carry (two decimal digits).
pub const MAX_SELECTOR: u8 = 99;

/// Number of probe reservoirs wired to the device.
pub const PROBE_COUNT: u32 = 24;

/// Reagent name of the probe loaded in hybridization cycle `cycle`.
pub fn probe(cycle: u32) -> String {
    format!("Probe {}", cycle)
}

/// Immutable ordered tuple of per-stage selector indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoutingVector([u8; ROUTING_STAGES]);

impl RoutingVector {
    /// Vector with every stage at selector 0.
    pub const ZERO: Self = Self([0; ROUTING_STAGES]);

    /// Create a vector from raw selector indices.
    pub const fn new(stages: [u8; ROUTING_STAGES]) -> Self {
        Self(stages)
    }

    /// Selector indices in stage order.
    pub fn stages(&self) -> &[u8; ROUTING_STAGES] {
        &self.0
    }

    /// Stages whose selector is non-zero, as `(stage index, selector)`.
    pub fn active_stages(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .map(|(index, value)| (index, *value))
    }
}

impl From<[u8; ROUTING_STAGES]> for RoutingVector {
    fn from(stages: [u8; ROUTING_STAGES]) -> Self {
        Self(stages)
    }
}

/// Renders as `[a,b,c,d,e]`, the form the firmware reports in its status line.
impl fmt::Display for RoutingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

/// Bidirectional reagent name ↔ routing vector mapping.
///
/// Insertion order is preserved so that routines walking every line (such as
/// cleaning) visit reagents in the order the plumbing was declared.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: Vec<(String, RoutingVector)>,
    by_name: HashMap<String, RoutingVector>,
    by_vector: HashMap<RoutingVector, String>,
}

impl RoutingTable {
    /// Build a table from `(name, vector)` pairs.
    ///
    /// # Errors
    /// [`MarlinError::DuplicateRouting`] if two names share a vector or a
    /// name appears twice, [`MarlinError::SelectorOutOfRange`] if a stage
    /// selector exceeds [`MAX_SELECTOR`].
    pub fn new<I, S>(entries: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (S, RoutingVector)>,
        S: Into<String>,
    {
        let mut table = Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_vector: HashMap::new(),
        };

        for (name, vector) in entries {
            let name = name.into();
            if vector.stages().iter().any(|&s| s > MAX_SELECTOR) {
                return Err(MarlinError::SelectorOutOfRange { name, vector });
            }
            if let Some(existing) = table.by_vector.get(&vector) {
                return Err(MarlinError::DuplicateRouting {
                    vector,
                    first: existing.clone(),
                    second: name,
                });
            }
            if let Some(previous) = table.by_name.get(&name) {
                return Err(MarlinError::DuplicateRouting {
                    vector: *previous,
                    first: name.clone(),
                    second: name,
                });
            }
            table.by_name.insert(name.clone(), vector);
            table.by_vector.insert(vector, name.clone());
            table.entries.push((name, vector));
        }

        Ok(table)
    }

    /// The plumbing of the reference instrument: 24 probes plus the five
    /// buffers.
    pub fn standard() -> AppResult<Self> {
        let mut entries: Vec<(String, RoutingVector)> = Vec::new();

        // Probes 1-11 sit on the second stage, 12-22 on the third, 23-24 on
        // the fourth.
        for n in 1..=11u8 {
            entries.push((probe(u32::from(n)), RoutingVector::new([0, n + 1, 1, 12, 0])));
        }
        for n in 12..=22u8 {
            entries.push((probe(u32::from(n)), RoutingVector::new([0, 1, n - 10, 12, 0])));
        }
        entries.push((probe(23), RoutingVector::new([0, 1, 1, 1, 0])));
        entries.push((probe(24), RoutingVector::new([0, 1, 1, 2, 0])));

        entries.push((SSC.to_string(), RoutingVector::new([0, 1, 1, 8, 0])));
        entries.push((PFA.to_string(), RoutingVector::new([0, 1, 1, 9, 0])));
        entries.push((ETOH.to_string(), RoutingVector::new([0, 1, 1, 10, 0])));
        entries.push((IMAGE.to_string(), RoutingVector::new([0, 1, 1, 11, 0])));
        entries.push((CLEAVE.to_string(), RoutingVector::new([0, 1, 1, 12, 0])));

        Self::new(entries)
    }

    /// Routing vector for `name`.
    pub fn lookup_vector(&self, name: &str) -> AppResult<RoutingVector> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| MarlinError::UnknownReagent(name.to_string()))
    }

    /// Reagent name routed by `vector`.
    pub fn lookup_name(&self, vector: &RoutingVector) -> AppResult<&str> {
        self.by_vector
            .get(vector)
            .map(String::as_str)
            .ok_or(MarlinError::UnknownRouting(*vector))
    }

    /// Whether `name` is a known reagent.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Reagent names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Number of reagents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no reagents.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_round_trips_every_reagent() {
        let table = RoutingTable::standard().unwrap();
        assert_eq!(table.len(), 29);
        for name in table.names() {
            let vector = table.lookup_vector(name).unwrap();
            assert_eq!(table.lookup_name(&vector).unwrap(), name);
        }
    }

    #[test]
    fn test_standard_table_known_vectors() {
        let table = RoutingTable::standard().unwrap();
        assert_eq!(
            table.lookup_vector("Probe 1").unwrap(),
            RoutingVector::new([0, 2, 1, 12, 0])
        );
        assert_eq!(
            table.lookup_vector("Probe 11").unwrap(),
            RoutingVector::new([0, 12, 1, 12, 0])
        );
        assert_eq!(
            table.lookup_vector("Probe 12").unwrap(),
            RoutingVector::new([0, 1, 2, 12, 0])
        );
        assert_eq!(
            table.lookup_vector("Probe 22").unwrap(),
            RoutingVector::new([0, 1, 12, 12, 0])
        );
        assert_eq!(
            table.lookup_vector(PFA).unwrap(),
            RoutingVector::new([0, 1, 1, 9, 0])
        );
    }

    #[test]
    fn test_duplicate_vector_rejected() {
        let result = RoutingTable::new([
            ("A", RoutingVector::new([0, 1, 1, 8, 0])),
            ("B", RoutingVector::new([0, 1, 1, 8, 0])),
        ]);
        match result {
            Err(MarlinError::DuplicateRouting { first, second, .. }) => {
                assert_eq!(first, "A");
                assert_eq!(second, "B");
            }
            other => panic!("expected DuplicateRouting, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = RoutingTable::new([
            ("A", RoutingVector::new([0, 1, 1, 8, 0])),
            ("A", RoutingVector::new([0, 1, 1, 9, 0])),
        ]);
        assert!(matches!(result, Err(MarlinError::DuplicateRouting { .. })));
    }

    #[test]
    fn test_three_digit_selector_rejected() {
        let result = RoutingTable::new([
            ("A", RoutingVector::new([0, 1, 1, 99, 0])),
            ("B", RoutingVector::new([0, 1, 100, 1, 0])),
        ]);
        match result {
            Err(MarlinError::SelectorOutOfRange { name, vector }) => {
                assert_eq!(name, "B");
                assert_eq!(vector, RoutingVector::new([0, 1, 100, 1, 0]));
            }
            other => panic!("expected SelectorOutOfRange, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_lookups() {
        let table = RoutingTable::standard().unwrap();
        assert!(matches!(
            table.lookup_vector("Probe 25"),
            Err(MarlinError::UnknownReagent(_))
        ));
        assert!(matches!(
            table.lookup_name(&RoutingVector::ZERO),
            Err(MarlinError::UnknownRouting(_))
        ));
    }

    #[test]
    fn test_display_matches_status_format() {
        let vector = RoutingVector::new([0, 1, 1, 9, 0]);
        assert_eq!(vector.to_string(), "[0,1,1,9,0]");
        let active: Vec<_> = vector.active_stages().collect();
        assert_eq!(active, vec![(1, 1), (2, 1), (3, 9)]);
    }
}
