//! Register-level model of the chip
//!
//! [`SimDevice`] implements [`RegisterBus`] on BAR0 offsets exactly like the
//! real BAR: remapped accesses only land where the selectors currently point,
//! ring registers drop writes while the clock gate is closed, and the MCU only
//! consumes descriptors after a doorbell. Descriptors and frames are read
//! through a [`HostDma`], so the model sees the bytes the device would.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dma::{Descriptor, HostDma, DESC_SIZE, MAX_TX_RINGS, MT_DMA_CTL_DMA_DONE};
use crate::firmware::mcu::{
    FwScatter, McuCommand, PacketType, MCU_FW_TXD_LEN, MCU_TXD_LEN, MT_TXD0_PKT_FMT,
};
use crate::io::RegisterBus;
use crate::notifier::tx_done_bit;
use crate::regs::{
    field_get, rx_ring, rx_ring_ext_ctrl, tx_ring, tx_ring_ext_ctrl, GloCfg, Lpctl, WfsysReset,
    BAR0_SIZE, FIXED_MAP, MCU_IDLE, MT7927_CHIP_ID, MT_CONN_ON_LPCTL, MT_CONN_ON_MISC, MT_DEAD,
    MT_HIF_REMAP_BASE_L1, MT_HIF_REMAP_BASE_L2, MT_HIF_REMAP_L1, MT_HIF_REMAP_L1_MASK,
    MT_HIF_REMAP_L2, MT_HOST2MCU_SW_INT_SET, MT_HOST2MCU_WAKE, MT_MCU_ROMCODE_INDEX, MT_PCIE_MAC_PM,
    MT_TOP_MISC2_FW_N9_RDY, MT_WFDMA0_GLO_CFG, MT_WFDMA0_HOST_INT_STA, MT_WFDMA0_RST_DRX_PTR,
    MT_WFDMA0_RST_DTX_PTR, MT_WFSYS_SW_RST_B, RING_BASE, RING_CIDX, RING_CNT, RING_DIDX,
};

const RX_RING_SPACE: u8 = 16;
const REMAP_WINDOW: u32 = 0x1_0000;

/// How the modelled chip reacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    /// Every read returns all-ones and writes are lost.
    pub hung: bool,
    /// LPCTL follows SET_OWN/CLR_OWN.
    pub ownership_responds: bool,
    /// INIT_DONE reads needed after the reset is released.
    pub init_done_after: u32,
    /// ROMCODE_INDEX reads before the boot ROM reports idle, `None` for never.
    pub rom_idle_after: Option<u32>,
    /// The MCU consumes TX descriptors on doorbell.
    pub consume: bool,
    /// Stop consuming the download ring after this many frames.
    pub consume_limit: Option<u32>,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            hung: false,
            ownership_responds: true,
            init_done_after: 2,
            rom_idle_after: Some(3),
            consume: true,
            consume_limit: None,
        }
    }
}

/// One firmware-download frame as the MCU received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Target from the FW_SCATTER command that announced the frame
    pub scatter: Option<FwScatter>,
    pub data: Vec<u8>,
}

/// One command frame as the MCU received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub cid: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl ReceivedCommand {
    pub fn command(&self) -> Option<McuCommand> {
        McuCommand::from_id(self.cid)
    }
}

#[derive(Default)]
struct SimState {
    behavior: SimBehavior,
    regs: HashMap<u32, u32>,
    l1_selector: u32,
    l2_selector: u32,
    own_sync: bool,
    /// INIT_DONE reads left, `None` while no reset was released
    init_countdown: Option<u32>,
    rom_reads: u32,
    writes: Vec<(u32, u32)>,
    dropped: Vec<u32>,
    scatter: VecDeque<FwScatter>,
    downloads: Vec<Download>,
    commands: Vec<ReceivedCommand>,
}

pub struct SimDevice {
    state: Mutex<SimState>,
    dma: Option<Arc<HostDma>>,
}

impl SimDevice {
    /// A chip with no view of host memory; doorbells are ignored.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A chip whose MCU reads descriptors and frames from `dma`.
    pub fn with_dma(dma: Arc<HostDma>) -> Self {
        Self::build(Some(dma))
    }

    fn build(dma: Option<Arc<HostDma>>) -> Self {
        let mut state = SimState::default();
        state.regs.insert(0x7403_0000, MT7927_CHIP_ID);
        state.regs.insert(MT_PCIE_MAC_PM, 0x0000_0010);
        Self {
            state: Mutex::new(state),
            dma,
        }
    }

    pub fn configure(&self, f: impl FnOnce(&mut SimBehavior)) {
        f(&mut self.state.lock().behavior);
    }

    /// Current value of a logical register, without side effects.
    pub fn peek(&self, addr: u32) -> u32 {
        self.state.lock().regs.get(&addr).copied().unwrap_or(0)
    }

    /// Set a logical register behind the driver's back.
    pub fn poke(&self, addr: u32, value: u32) {
        self.state.lock().regs.insert(addr, value);
    }

    /// Every accepted or dropped write, by logical address, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Ring register writes discarded because the clock gate was closed.
    pub fn dropped_writes(&self) -> Vec<u32> {
        self.state.lock().dropped.clone()
    }

    pub fn downloads(&self) -> Vec<Download> {
        self.state.lock().downloads.clone()
    }

    pub fn commands(&self) -> Vec<ReceivedCommand> {
        self.state.lock().commands.clone()
    }

    pub fn selectors(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.l1_selector, state.l2_selector)
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    /// Logical address behind a BAR0 offset, given the current selectors.
    fn logical(&self, offset: u32) -> u32 {
        if (MT_HIF_REMAP_BASE_L1..MT_HIF_REMAP_BASE_L1 + REMAP_WINDOW).contains(&offset) {
            let window = offset - MT_HIF_REMAP_BASE_L1;
            let base = self.l1_selector & MT_HIF_REMAP_L1_MASK;
            if base == MT_HIF_REMAP_BASE_L2 & MT_HIF_REMAP_L1_MASK {
                return self.l2_selector.wrapping_add(window);
            }
            return base | window;
        }

        FIXED_MAP
            .iter()
            .filter(|r| r.local_base + r.size <= BAR0_SIZE && r.contains_local(offset))
            .min_by_key(|r| r.size)
            .map(|r| r.physical_base + (offset - r.local_base))
            .unwrap_or(offset)
    }

    fn get(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn read(&mut self, addr: u32) -> u32 {
        match addr {
            MT_CONN_ON_LPCTL => {
                if self.own_sync {
                    Lpctl::OWN_SYNC.bits()
                } else {
                    0
                }
            }
            MT_WFSYS_SW_RST_B => {
                let mut value = self.get(addr) & WfsysReset::RST_B_EN.bits();
                if let Some(left) = self.init_countdown {
                    if left == 0 {
                        value |= WfsysReset::INIT_DONE.bits();
                    } else {
                        self.init_countdown = Some(left - 1);
                    }
                }
                value
            }
            MT_MCU_ROMCODE_INDEX => {
                if self.init_countdown != Some(0) {
                    return 0;
                }
                self.rom_reads += 1;
                match self.behavior.rom_idle_after {
                    Some(after) if self.rom_reads > after => MCU_IDLE,
                    _ => 0x0000_0001,
                }
            }
            _ => self.get(addr),
        }
    }

    fn write(&mut self, addr: u32, value: u32, dma: Option<&HostDma>) {
        self.writes.push((addr, value));

        match addr {
            MT_CONN_ON_LPCTL => {
                if self.behavior.ownership_responds {
                    let cmd = Lpctl::from_bits_retain(value);
                    if cmd.contains(Lpctl::HOST_SET_OWN) {
                        self.own_sync = true;
                    }
                    if cmd.contains(Lpctl::HOST_CLR_OWN) {
                        self.own_sync = false;
                    }
                }
            }
            MT_WFSYS_SW_RST_B => {
                let was_enabled = self.get(addr) & WfsysReset::RST_B_EN.bits() != 0;
                let enabled = value & WfsysReset::RST_B_EN.bits() != 0;
                if !enabled {
                    self.init_countdown = None;
                    self.rom_reads = 0;
                } else if !was_enabled {
                    self.init_countdown = Some(self.behavior.init_done_after);
                }
                self.regs.insert(addr, value & WfsysReset::RST_B_EN.bits());
            }
            MT_WFDMA0_HOST_INT_STA => {
                let pending = self.get(addr) & !value;
                self.regs.insert(addr, pending);
            }
            MT_WFDMA0_RST_DTX_PTR => {
                for n in (0..MAX_TX_RINGS).filter(|n| value & (1 << n) != 0) {
                    self.regs.insert(tx_ring(n) + RING_CIDX, 0);
                    self.regs.insert(tx_ring(n) + RING_DIDX, 0);
                }
            }
            MT_WFDMA0_RST_DRX_PTR => {
                for n in (0..RX_RING_SPACE).filter(|n| value & (1 << n) != 0) {
                    self.regs.insert(rx_ring(n) + RING_CIDX, 0);
                    self.regs.insert(rx_ring(n) + RING_DIDX, 0);
                }
            }
            MT_HOST2MCU_SW_INT_SET => {
                if value & MT_HOST2MCU_WAKE != 0 {
                    if let Some(dma) = dma {
                        self.doorbell(dma);
                    }
                }
            }
            _ if is_gated(addr) => {
                let glo = GloCfg::from_bits_retain(self.get(MT_WFDMA0_GLO_CFG));
                if glo.contains(GloCfg::CLK_GATE_DIS) && !glo.intersects(GloCfg::DMA_EN) {
                    self.regs.insert(addr, value);
                } else {
                    self.dropped.push(addr);
                }
            }
            _ => {
                self.regs.insert(addr, value);
            }
        }
    }

    /// The MCU scans every TX ring with work pending.
    fn doorbell(&mut self, dma: &HostDma) {
        let glo = GloCfg::from_bits_retain(self.get(MT_WFDMA0_GLO_CFG));
        if !self.behavior.consume || !glo.contains(GloCfg::TX_DMA_EN) {
            return;
        }

        for n in 0..MAX_TX_RINGS {
            let regs = tx_ring(n);
            let base = self.get(regs + RING_BASE) as u64;
            let cnt = self.get(regs + RING_CNT);
            if base == 0 || cnt == 0 {
                continue;
            }

            let cidx = self.get(regs + RING_CIDX) % cnt;
            let mut didx = self.get(regs + RING_DIDX) % cnt;
            while didx != cidx {
                if self.consume_one(dma, base + (didx as usize * DESC_SIZE) as u64).is_none() {
                    break;
                }
                didx = (didx + 1) % cnt;
                self.regs.insert(regs + RING_DIDX, didx);
                if let Some(bit) = tx_done_bit(n) {
                    let sta = self.get(MT_WFDMA0_HOST_INT_STA) | bit;
                    self.regs.insert(MT_WFDMA0_HOST_INT_STA, sta);
                }
            }
        }
    }

    fn consume_one(&mut self, dma: &HostDma, desc_addr: u64) -> Option<()> {
        let raw = dma.read_phys(desc_addr, DESC_SIZE)?;
        let mut bytes = [0u8; DESC_SIZE];
        bytes.copy_from_slice(&raw);
        let mut desc = Descriptor::from_bytes(&bytes);
        let frame = dma.read_phys(desc.buffer_addr(), desc.len0() as usize)?;
        let txd0 = crate::firmware::le32(&frame, 0)?;

        match field_get(MT_TXD0_PKT_FMT, txd0) {
            fmt if fmt == PacketType::Command as u32 => {
                let cmd = ReceivedCommand {
                    cid: *frame.get(36)?,
                    seq: *frame.get(39)?,
                    payload: frame.get(MCU_TXD_LEN..)?.to_vec(),
                };
                match cmd.command() {
                    Some(McuCommand::FwScatter) => {
                        if let Some(scatter) = FwScatter::from_bytes(&cmd.payload) {
                            self.scatter.push_back(scatter);
                        }
                    }
                    Some(McuCommand::StartFirmware) => {
                        let misc = self.get(MT_CONN_ON_MISC) | MT_TOP_MISC2_FW_N9_RDY;
                        self.regs.insert(MT_CONN_ON_MISC, misc);
                    }
                    _ => {}
                }
                self.commands.push(cmd);
            }
            fmt if fmt == PacketType::Firmware as u32 => {
                if let Some(limit) = self.behavior.consume_limit {
                    if self.downloads.len() as u32 >= limit {
                        return None;
                    }
                }
                self.downloads.push(Download {
                    scatter: self.scatter.pop_front(),
                    data: frame.get(MCU_FW_TXD_LEN..)?.to_vec(),
                });
            }
            _ => {}
        }

        desc.ctrl |= MT_DMA_CTL_DMA_DONE;
        dma.write_phys(desc_addr, &desc.to_bytes());
        Some(())
    }
}

/// BASE, CNT and EXT_CTRL of every TX and RX ring.
fn is_gated(addr: u32) -> bool {
    let rings = tx_ring(0)..rx_ring(RX_RING_SPACE);
    let ext = tx_ring_ext_ctrl(0)..rx_ring_ext_ctrl(RX_RING_SPACE);
    (rings.contains(&addr) && addr & 0xf < RING_CIDX) || ext.contains(&addr)
}

impl RegisterBus for SimDevice {
    fn read(&self, offset: u32) -> u32 {
        let mut state = self.state.lock();
        if state.behavior.hung {
            return MT_DEAD;
        }
        match offset {
            MT_HIF_REMAP_L1 => state.l1_selector,
            MT_HIF_REMAP_L2 => state.l2_selector,
            _ => {
                let addr = state.logical(offset);
                state.read(addr)
            }
        }
    }

    fn write(&self, offset: u32, value: u32) {
        let mut state = self.state.lock();
        if state.behavior.hung {
            return;
        }
        match offset {
            MT_HIF_REMAP_L1 => state.l1_selector = value,
            MT_HIF_REMAP_L2 => state.l2_selector = value,
            _ => {
                let addr = state.logical(offset);
                state.write(addr, value, self.dma.as_deref());
            }
        }
    }
}
