//! Host interrupt status decoding
//!
//! HOST_INT_STA packs TX-done, RX-done and MCU notification bits. Which bit
//! belongs to which ring is table driven, built from the ring layout, so a
//! different layout only changes the table.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::dma::{RingManager, RingRole, RingSlot};
use crate::error::Result;
use crate::io::RegisterBus;
use crate::regs::{
    int_rx_done, int_tx_done, MT_INT_MCU_CMD, MT_INT_TX_DONE_FWDL, MT_INT_TX_DONE_MCU_WM,
    MT_WFDMA0_HOST_INT_ENA, MT_WFDMA0_HOST_INT_STA,
};
use crate::translate::AddressTranslator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    TxDone(u8),
    RxDone(u8),
    McuCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEvent {
    /// A TX ring's DMA index moved; `consumer` is the shadow index at the time.
    TxDone { ring: u8, role: RingRole, consumer: u32 },
    RxDone { ring: u8 },
    /// The MCU raised a software interrupt.
    McuCommand,
}

/// TX-done status bit of a ring index, if the hardware has one.
pub fn tx_done_bit(index: u8) -> Option<u32> {
    match index {
        0..=7 => Some(int_tx_done(index as u32)),
        15 => Some(MT_INT_TX_DONE_MCU_WM),
        16 => Some(MT_INT_TX_DONE_FWDL),
        _ => None,
    }
}

/// Status bit to source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqMap {
    entries: Vec<(u32, IrqSource)>,
}

impl IrqMap {
    pub fn new(entries: Vec<(u32, IrqSource)>) -> Self {
        Self { entries }
    }

    /// TX-done bits for every ring that is not [`RingRole::Unused`], RX-done
    /// bits for `rx_rings` RX rings, and the MCU command bit.
    pub fn from_layout(layout: &[RingSlot], rx_rings: u8) -> Self {
        let mut entries: Vec<_> = layout
            .iter()
            .filter(|slot| slot.role != RingRole::Unused)
            .filter_map(|slot| {
                tx_done_bit(slot.index).map(|mask| (mask, IrqSource::TxDone(slot.index)))
            })
            .collect();
        entries.extend((0..rx_rings.min(4)).map(|n| (int_rx_done(n as u32), IrqSource::RxDone(n))));
        entries.push((MT_INT_MCU_CMD, IrqSource::McuCommand));
        Self { entries }
    }

    /// Every bit the table knows about.
    pub fn mask(&self) -> u32 {
        self.entries.iter().fold(0, |acc, (mask, _)| acc | mask)
    }

    pub fn decode(&self, status: u32) -> impl Iterator<Item = IrqSource> + '_ {
        self.entries
            .iter()
            .filter(move |(mask, _)| status & mask != 0)
            .map(|(_, source)| *source)
    }
}

pub struct CompletionNotifier {
    map: IrqMap,
    last_status: AtomicU32,
}

impl CompletionNotifier {
    pub fn new(map: IrqMap) -> Self {
        Self {
            map,
            last_status: AtomicU32::new(0),
        }
    }

    pub fn map(&self) -> &IrqMap {
        &self.map
    }

    /// Status seen by the most recent [`CompletionNotifier::service`].
    pub fn last_status(&self) -> u32 {
        self.last_status.load(Ordering::Acquire)
    }

    pub fn enable<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        translator: &AddressTranslator,
    ) -> Result<()> {
        let mask = self.map.mask();
        let value = translator.read(bus, MT_WFDMA0_HOST_INT_ENA)? | mask;
        translator.write(bus, MT_WFDMA0_HOST_INT_ENA, value)?;
        log::debug!("mt7927: host interrupts enabled, mask {:#010x}", mask);
        Ok(())
    }

    pub fn disable<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        translator: &AddressTranslator,
    ) -> Result<()> {
        translator.write(bus, MT_WFDMA0_HOST_INT_ENA, 0)
    }

    /// Read and acknowledge pending status, one event per source.
    pub fn service<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        translator: &AddressTranslator,
        rings: &RingManager,
    ) -> Result<Vec<CompletionEvent>> {
        let status = translator.read(bus, MT_WFDMA0_HOST_INT_STA)?;
        self.last_status.store(status, Ordering::Release);
        if status == 0 {
            return Ok(Vec::new());
        }

        // Write-one-to-clear
        translator.write(bus, MT_WFDMA0_HOST_INT_STA, status)?;

        let events: Vec<_> = self
            .map
            .decode(status)
            .filter_map(|source| match source {
                IrqSource::TxDone(index) => rings.ring(index).map(|ring| CompletionEvent::TxDone {
                    ring: index,
                    role: ring.role(),
                    consumer: ring.consumer(),
                }),
                IrqSource::RxDone(ring) => Some(CompletionEvent::RxDone { ring }),
                IrqSource::McuCommand => Some(CompletionEvent::McuCommand),
            })
            .collect();

        let unknown = status & !self.map.mask();
        if unknown != 0 {
            log::debug!("mt7927: unmapped interrupt bits {:#010x}", unknown);
        }
        log::trace!("mt7927: HOST_INT_STA {:#010x}, {} events", status, events.len());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_layout;

    #[test]
    fn test_default_map() {
        let map = IrqMap::from_layout(&default_layout(), 4);
        assert_eq!(map.mask(), 0x2600_0001 | 0x000f_0000);

        let sources: Vec<_> = map.decode(MT_INT_TX_DONE_FWDL | MT_INT_MCU_CMD).collect();
        assert_eq!(sources, vec![IrqSource::TxDone(16), IrqSource::McuCommand]);
    }

    #[test]
    fn test_tx_done_bits() {
        assert_eq!(tx_done_bit(0), Some(0x1));
        assert_eq!(tx_done_bit(15), Some(1 << 25));
        assert_eq!(tx_done_bit(16), Some(1 << 26));
        assert_eq!(tx_done_bit(10), None);
        assert_eq!(tx_done_bit(17), None);
    }

    #[test]
    fn test_custom_table() {
        let map = IrqMap::new(vec![
            (1 << 4, IrqSource::TxDone(16)),
            (1 << 5, IrqSource::TxDone(15)),
        ]);
        let sources: Vec<_> = map.decode(0x30).collect();
        assert_eq!(sources, vec![IrqSource::TxDone(16), IrqSource::TxDone(15)]);
    }
}
