//! Decoded event record.

/// One detected neutron in logical image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEventRecord {
    /// Logical column.
    pub x: u16,
    /// Logical row.
    pub y: u16,
    /// Time-of-flight clock tick.
    pub tick: u32,
    /// Pulse-height channel; only the legacy layout records one.
    pub energy: Option<u16>,
}

impl RawEventRecord {
    /// Creates a record without an energy channel.
    #[must_use]
    pub fn new(x: u16, y: u16, tick: u32) -> Self {
        Self {
            x,
            y,
            tick,
            energy: None,
        }
    }

    /// Sets the energy channel.
    #[must_use]
    pub fn with_energy(mut self, energy: u16) -> Self {
        self.energy = Some(energy);
        self
    }
}
